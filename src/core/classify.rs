use regex::Regex;
use std::sync::OnceLock;

/// Last event the server emits before closing the stream.
pub const DONE_SENTINEL: &str = "__DONE__";

/// Markers yt-dlp prints when it settles on an output path.
const DESTINATION_MARKERS: [&str; 2] = ["[download] Destination:", "[ExtractAudio] Destination:"];

/// What one stream line means for the session.
///
/// The checks are independent; a single line can carry both a destination and
/// a percentage. Only the sentinel short-circuits.
#[derive(Debug, Clone, PartialEq)]
pub enum LineClass<'a> {
    Done,
    Log {
        destination: Option<&'a str>,
        percent: Option<f64>,
    },
}

pub fn classify(line: &str) -> LineClass<'_> {
    if line == DONE_SENTINEL {
        return LineClass::Done;
    }
    LineClass::Log {
        destination: destination_name(line),
        percent: first_percent(line),
    }
}

/// File name from a destination line: the final `/` segment of the payload,
/// e.g. `[download] Destination: /tmp/out/clip.mp4` -> `clip.mp4`.
fn destination_name(line: &str) -> Option<&str> {
    if !DESTINATION_MARKERS.iter().any(|m| line.contains(m)) {
        return None;
    }
    line.rsplit('/').next()
}

/// First `NNN.N%` occurrence in the line, parsed as a percentage.
fn first_percent(line: &str) -> Option<f64> {
    static PERCENT: OnceLock<Regex> = OnceLock::new();
    let re = PERCENT.get_or_init(|| Regex::new(r"(\d{1,3}\.\d)%").expect("percent regex"));
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_done() {
        assert_eq!(classify("__DONE__"), LineClass::Done);
    }

    #[test]
    fn sentinel_must_match_exactly() {
        assert!(matches!(classify(" __DONE__"), LineClass::Log { .. }));
        assert!(matches!(classify("__DONE__ extra"), LineClass::Log { .. }));
    }

    #[test]
    fn percent_anywhere_in_line() {
        let c = classify("[download]  57.8% of 10.00MiB at 2.00MiB/s");
        assert_eq!(
            c,
            LineClass::Log {
                destination: None,
                percent: Some(57.8)
            }
        );
    }

    #[test]
    fn first_percent_wins() {
        let c = classify("12.5% then 99.9%");
        assert!(matches!(c, LineClass::Log { percent: Some(p), .. } if p == 12.5));
    }

    #[test]
    fn hundred_percent_parses() {
        let c = classify("[download] 100.0% of 3.2MiB");
        assert!(matches!(c, LineClass::Log { percent: Some(p), .. } if p == 100.0));
    }

    #[test]
    fn percent_requires_single_fraction_digit() {
        assert!(matches!(
            classify("99% done"),
            LineClass::Log { percent: None, .. }
        ));
    }

    #[test]
    fn download_destination_marker() {
        let c = classify("[download] Destination: /home/user/Downloads/song.mp3");
        assert!(matches!(c, LineClass::Log { destination: Some("song.mp3"), .. }));
    }

    #[test]
    fn extract_audio_destination_marker() {
        let c = classify("[ExtractAudio] Destination: /srv/media/track.opus");
        assert!(matches!(c, LineClass::Log { destination: Some("track.opus"), .. }));
    }

    #[test]
    fn plain_line_classifies_as_empty_log() {
        assert_eq!(
            classify("[youtube] abc123: Downloading webpage"),
            LineClass::Log {
                destination: None,
                percent: None
            }
        );
    }

    #[test]
    fn destination_and_percent_in_one_line() {
        let c = classify("[download] Destination: /tmp/a.mp4 at 42.3%");
        assert_eq!(
            c,
            LineClass::Log {
                destination: Some("a.mp4 at 42.3%"),
                percent: Some(42.3)
            }
        );
    }
}
