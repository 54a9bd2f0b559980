use reqwest::Url;

/// Prefix of the top-level playlist line that references the chunklist.
pub const CHUNKLIST_MARKER: &str = "chunklist";
/// Prefix of the chunklist lines that reference media chunks.
pub const CHUNK_MARKER: &str = "media";

const MEDIA_SEQUENCE_TAG: &str = "#EXT-X-MEDIA-SEQUENCE";
const EXTINF_TAG: &str = "#EXTINF";

/// One poll of the chunklist.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunklist {
    /// Index of the first listed chunk.
    pub media_sequence: u64,
    /// Sum of the `#EXTINF` durations, in seconds.
    pub total_duration: f64,
    pub chunks: Vec<String>,
}

fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim)
}

/// Finds the chunklist reference in the top-level playlist.
pub fn parse_playlist(playlist: &str) -> Option<&str> {
    lines(playlist).find(|line| line.starts_with(CHUNKLIST_MARKER))
}

/// Parses a chunklist. Only the media sequence directive, chunk durations and
/// chunk references are recognised, every other line is skipped.
pub fn parse_chunklist(chunklist: &str) -> Chunklist {
    let mut cl = Chunklist {
        media_sequence: 0,
        total_duration: 0.0,
        chunks: Vec::new(),
    };
    let mut duration = None;

    for line in lines(chunklist) {
        if let Some(value) = line.strip_prefix(MEDIA_SEQUENCE_TAG) {
            match value.trim_start_matches(':').trim().parse() {
                Ok(seq) => cl.media_sequence = seq,
                Err(_) => debug!("Ignoring bad media sequence line {:?}", line),
            }
        } else if let Some(value) = line.strip_prefix(EXTINF_TAG) {
            let value = value.trim_start_matches(':');
            let value = value.split(',').next().unwrap_or_default();
            duration = value.trim().parse::<f64>().ok();
        } else if line.starts_with(CHUNK_MARKER) {
            cl.total_duration += duration.take().unwrap_or_default();
            cl.chunks.push(line.to_string());
        }
    }

    cl
}

/// Resolves a playlist reference against the URL of the document it came from.
pub fn resolve(base: &Url, reference: &str) -> Result<Url, url::ParseError> {
    base.join(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_file(fname: &str) -> String {
        let mut d = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push("resources/test/");
        d.push(fname);
        std::fs::read_to_string(d).expect(format!("Could not read {}", fname).as_str())
    }

    #[test]
    fn playlist_reference() {
        assert_eq!(
            parse_playlist("#EXTM3U\nchunklist.m3u8\n"),
            Some("chunklist.m3u8")
        );
        assert_eq!(parse_playlist("#EXTM3U\n#EXT-X-VERSION:3\n"), None);

        let playlist = get_test_file("playlist.m3u8");
        assert_eq!(
            parse_playlist(&playlist),
            Some("chunklist_w1234567890.m3u8")
        );
    }

    #[test]
    fn chunklist_scenario() {
        let cl = parse_chunklist(
            "#EXT-X-MEDIA-SEQUENCE:100\n#EXTINF:2.0,\nmedia_100.ts\n#EXTINF:2.0,\nmedia_101.ts\n",
        );
        assert_eq!(cl.media_sequence, 100);
        assert_eq!(cl.total_duration, 4.0);
        assert_eq!(cl.chunks, ["media_100.ts", "media_101.ts"]);
    }

    #[test]
    fn chunklist_fixture() {
        let cl = parse_chunklist(&get_test_file("chunklist.m3u8"));
        assert_eq!(cl.media_sequence, 3717);
        assert_eq!(cl.chunks.len(), 4);
        assert_eq!(cl.chunks[0], "media_w1234567890_3717.ts");
        assert!((cl.total_duration - 8.1).abs() < 1e-9);
    }

    #[test]
    fn chunklist_tolerates_garbage() {
        let cl = parse_chunklist(
            "#EXTM3U\r\n#EXT-X-MEDIA-SEQUENCE:abc\r\n#EXTINF:oops,\r\nmedia_1.ts\r\n#EXT-X-ENDLIST\r\n",
        );
        assert_eq!(cl.media_sequence, 0);
        assert_eq!(cl.total_duration, 0.0);
        assert_eq!(cl.chunks, ["media_1.ts"]);
    }

    #[test]
    fn resolve_relative_references() {
        let base = Url::parse(
            "https://video1.example.com/NxServer/ngrp:mfc_100000321.f4v_mobile/playlist.m3u8?nc=0.5",
        )
        .unwrap();
        assert_eq!(
            resolve(&base, "chunklist.m3u8").unwrap().as_str(),
            "https://video1.example.com/NxServer/ngrp:mfc_100000321.f4v_mobile/chunklist.m3u8"
        );
        assert_eq!(
            resolve(&base, "media_5.ts?nc=1").unwrap().as_str(),
            "https://video1.example.com/NxServer/ngrp:mfc_100000321.f4v_mobile/media_5.ts?nc=1"
        );
    }
}
