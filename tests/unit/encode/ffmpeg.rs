use super::*;

const ENCODERS: &str = "\
Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D libvpx               libvpx VP8 (codec vp8)
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 A....D aac                  AAC (Advanced Audio Coding)
 S..... ass                  ASS (Advanced SubStation Alpha) subtitle
";

#[test]
fn flatten_premul_alpha_0_returns_bg() {
    let src = vec![0u8, 0, 0, 0];
    let mut dst = vec![0u8; 4];
    flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &src, [10, 20, 30, 255]).unwrap();
    assert_eq!(dst, vec![10, 20, 30, 255]);
}

#[test]
fn flatten_premul_alpha_255_is_identity() {
    let src = vec![1u8, 2, 3, 255];
    let mut dst = vec![0u8; 4];
    flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &src, [10, 20, 30, 255]).unwrap();
    assert_eq!(dst, src);
}

#[test]
fn flatten_rejects_mismatched_buffers() {
    let mut dst = vec![0u8; 8];
    assert!(flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &[0u8; 4], [0; 4]).is_err());
}

#[test]
fn encoder_list_keeps_video_encoders_only() {
    let names = parse_encoder_list(ENCODERS);
    assert_eq!(names, vec!["libx264", "libvpx", "libvpx-vp9"]);
    let codec = VideoCodec::probe(|c| names.iter().any(|n| n == c.encoder()));
    assert_eq!(codec, VideoCodec::Vp9);
}

#[test]
fn encoder_list_without_table_is_empty() {
    assert!(parse_encoder_list("").is_empty());
    assert!(parse_encoder_list("ffmpeg: command not found").is_empty());
}

#[test]
fn begin_rejects_odd_sizes_before_spawning() {
    let mut sink = FfmpegSink::new(FfmpegSinkOpts {
        codec: Some(VideoCodec::Vp8),
        ..FfmpegSinkOpts::default()
    });
    let err = sink
        .begin(SinkConfig {
            width: 3,
            height: 2,
            fps: Fps::new(10, 1).unwrap(),
        })
        .unwrap_err();
    assert!(matches!(err, TripError::Validation(_)));
    assert!(sink.take_chunks().is_empty());
    sink.abort();
}

#[cfg(feature = "media-ffmpeg")]
#[test]
fn streams_chunks_from_real_ffmpeg() {
    if !is_ffmpeg_on_path() {
        return;
    }
    let mut sink = FfmpegSink::new(FfmpegSinkOpts::default());
    sink.begin(SinkConfig {
        width: 16,
        height: 16,
        fps: Fps::new(10, 1).unwrap(),
    })
    .unwrap();
    let frame = FrameRGBA {
        width: 16,
        height: 16,
        data: vec![128u8; 16 * 16 * 4],
        premultiplied: true,
    };
    let mut chunks = Vec::new();
    for _ in 0..10 {
        sink.push_frame(&frame).unwrap();
        chunks.extend(sink.take_chunks());
    }
    chunks.extend(sink.end().unwrap());
    let total: usize = chunks.iter().map(EncodedChunk::len).sum();
    assert!(total > 0);
}
