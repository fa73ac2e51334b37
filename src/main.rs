use clap::{Arg, Command};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use streamwatch::core::events::MonitorEvent;
use streamwatch::core::model::TerminationReason;
use streamwatch::core::monitor::Monitor;
use streamwatch::transport::sse::SseTransport;
use streamwatch::transport::TransportContext;
use tracing_subscriber::EnvFilter;
use url::Url;

fn build_cli() -> Command {
    let watch = Command::new("watch")
        .about("Watch the progress stream of one download")
        .arg(
            Arg::new("mode")
                .help("Download mode, e.g. mp3 or mp4")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("url")
                .help("Source media URL")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("quality")
                .long("quality")
                .help("Quality selector forwarded to the service")
                .default_value("best")
                .num_args(1),
        )
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .help("Base URL of the download service")
                .default_value("http://127.0.0.1:8001")
                .num_args(1),
        )
        .arg(
            Arg::new("connect_timeout")
                .long("connect-timeout-secs")
                .help("Connect timeout in seconds")
                .default_value("30")
                .num_args(1),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .help("Max reconnect attempts before giving up")
                .default_value("2")
                .num_args(1),
        )
        .arg(
            Arg::new("backoff")
                .long("retry-backoff-ms")
                .help("Base backoff between reconnect attempts")
                .default_value("400")
                .num_args(1),
        );

    Command::new("streamwatch")
        .about("Progress monitor for the media download service")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(watch)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("watch", m)) => {
            let mode = m.get_one::<String>("mode").unwrap().clone();
            let source_url = m.get_one::<String>("url").unwrap().clone();
            let quality = m.get_one::<String>("quality").unwrap().clone();
            let endpoint: Url = m.get_one::<String>("endpoint").unwrap().parse()?;

            let ctx = TransportContext {
                user_agent: "streamwatch/0.1".to_string(),
                connect_timeout_secs: m.get_one::<String>("connect_timeout").unwrap().parse()?,
                retries: m.get_one::<String>("retries").unwrap().parse()?,
                retry_backoff_ms: m.get_one::<String>("backoff").unwrap().parse()?,
            };

            let transport = Arc::new(SseTransport::new(&ctx));
            let monitor = Monitor::new(transport, endpoint, ctx);

            let mut rx = monitor.subscribe();
            let session_id = monitor.start(&mode, &quality, &source_url).await?;

            let ui_mode = mode.clone();
            let ui_task = tokio::spawn(async move {
                let pb = ProgressBar::new(100);
                pb.set_style(
                    ProgressStyle::with_template("{prefix} {bar:40.cyan/blue} {pos:>3}% {wide_msg}")
                        .unwrap(),
                );
                pb.set_prefix(format!("[{ui_mode}]"));

                let mut failed = false;
                loop {
                    let evt = match rx.recv().await {
                        Ok(e) => e,
                        Err(_) => break,
                    };

                    match evt {
                        MonitorEvent::LineAppended { line, .. } => {
                            pb.println(line);
                        }
                        MonitorEvent::ProgressUpdated { percent, .. } => {
                            pb.set_position(percent.round() as u64);
                        }
                        MonitorEvent::FileDiscovered { file, .. } => {
                            pb.set_message(format!("-> {}{}", file.directory_hint, file.name));
                        }
                        MonitorEvent::SessionTerminated { reason, .. } => {
                            match reason {
                                TerminationReason::Completed => {
                                    pb.finish_with_message("done");
                                }
                                reason => {
                                    failed = true;
                                    pb.abandon_with_message(format!("{reason:?}"));
                                }
                            }
                            break;
                        }
                        MonitorEvent::Error { scope, message } => {
                            pb.println(format!("[ERR] {scope}: {message}"));
                        }
                        MonitorEvent::Info { scope, message } => {
                            pb.println(format!("[INFO] {scope}: {message}"));
                        }
                        MonitorEvent::SessionStarted { .. } => {}
                    }
                }
                failed
            });

            monitor.wait_session(session_id).await;
            let failed = ui_task.await.unwrap_or(true);

            if let Some(snapshot) = monitor.snapshot().await {
                for file in &snapshot.discovered {
                    println!("Saved: {}{}", file.directory_hint, file.name);
                }
            }

            if failed {
                anyhow::bail!("stream failed before completion");
            }
        }
        _ => {}
    }

    Ok(())
}
