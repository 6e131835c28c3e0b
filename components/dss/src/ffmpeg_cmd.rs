//! Pure FFmpeg argv composers.
//!
//! These are treated as external collaborators by the rest of the crate:
//! they take option strings and URIs and return the argv FFmpeg should be
//! spawned with. No process handling lives here.

/// Builds a simple single-input/single-output FFmpeg argv:
/// `<input_opts> -i <input_uri> <output_opts> <output_uri>`.
#[must_use]
pub fn build_cmd(
    input_opts: &str,
    input_uri: &str,
    output_opts: &str,
    output_uri: &str,
) -> Vec<String> {
    let mut argv: Vec<String> =
        input_opts.split_whitespace().map(str::to_string).collect();
    argv.push("-i".to_string());
    argv.push(input_uri.to_string());
    argv.extend(output_opts.split_whitespace().map(str::to_string));
    argv.push(output_uri.to_string());
    argv
}

/// Builds an FFmpeg argv with several inputs and several
/// `(output_opts, output_uri)` pairs sharing one global option string,
/// mirroring how the mobile muxer feeds two FIFOs into two outputs (the
/// RTMP destination and a periodic thumbnail).
#[must_use]
pub fn build_cmd_multi(
    global_opts: &str,
    inputs: &[String],
    shared_input_opts: &str,
    outputs: &[(String, String)],
) -> Vec<String> {
    let mut argv: Vec<String> =
        global_opts.split_whitespace().map(str::to_string).collect();
    for input in inputs {
        argv.extend(
            shared_input_opts.split_whitespace().map(str::to_string),
        );
        argv.push("-i".to_string());
        argv.push(input.clone());
    }
    for (opts, uri) in outputs {
        argv.extend(opts.split_whitespace().map(str::to_string));
        argv.push(uri.clone());
    }
    argv
}

/// Builds the thumbnail argv for one stream: reads `source_uri` (optionally
/// seeking `seek_secs` into it) and writes one resized file per entry in
/// `sizes` plus the unscaled base file.
#[must_use]
pub fn build_thumbnail_cmd(
    input_opt: &str,
    source_uri: &str,
    seek_secs: Option<u64>,
    output_opt: &str,
    resize_opt: &str,
    base_path: &str,
    format: &str,
    sizes: &[(String, String)],
) -> Vec<String> {
    let mut argv: Vec<String> = Vec::new();
    if let Some(secs) = seek_secs {
        argv.push("-ss".to_string());
        argv.push(secs.to_string());
    }
    argv.extend(input_opt.split_whitespace().map(str::to_string));
    argv.push("-i".to_string());
    argv.push(source_uri.to_string());

    argv.extend(output_opt.split_whitespace().map(str::to_string));
    argv.push(format!("{}.{}", base_path, format));

    for (name, scale) in sizes {
        argv.extend(resize_opt.replace("{scale}", scale).split_whitespace().map(str::to_string));
        argv.push(format!("{}-{}.{}", base_path, name, format));
    }
    argv
}

#[cfg(test)]
mod ffmpeg_cmd_spec {
    use super::*;

    #[test]
    fn build_cmd_places_input_before_output() {
        let argv = build_cmd("-re", "rtsp://src", "-c copy -f flv", "rtmp://dst");
        assert_eq!(
            argv,
            vec!["-re", "-i", "rtsp://src", "-c", "copy", "-f", "flv", "rtmp://dst"]
        );
    }

    #[test]
    fn build_thumbnail_cmd_seeks_when_requested() {
        let argv = build_thumbnail_cmd(
            "-y",
            "rtmp://local/live/C1",
            Some(1),
            "-update 1",
            "-vf scale={scale}",
            "/tmp/thumb/C1",
            "jpg",
            &[("small".to_string(), "160:-1".to_string())],
        );
        assert_eq!(argv[0], "-ss");
        assert_eq!(argv[1], "1");
        assert!(argv.contains(&"/tmp/thumb/C1.jpg".to_string()));
        assert!(argv.contains(&"/tmp/thumb/C1-small.jpg".to_string()));
    }
}
