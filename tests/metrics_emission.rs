use std::collections::HashSet;

use bytes::Bytes;
use image::{DynamicImage, RgbaImage};
use kirie::application::{MediaEngine, banner_metrics, image_metrics, raster};
use kirie::domain::{BannerSettings, ImageFormat, TextLayers, TransformParams};
use metrics_util::debugging::DebuggingRecorder;
use serial_test::serial;

fn png(width: u32, height: u32) -> Bytes {
    let image = RgbaImage::from_pixel(width, height, image::Rgba([30, 90, 160, 255]));
    Bytes::from(raster::encode(&DynamicImage::ImageRgba8(image), ImageFormat::Png, 100).unwrap())
}

#[tokio::test]
#[serial]
async fn media_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let engine = MediaEngine::builder().without_sweeper().build();
    let transformer = engine.transformer();
    let img = png(120, 80);
    let params = TransformParams::new(60, 40, ImageFormat::Jpeg, 80);

    // Miss, then hit.
    transformer.transform(img.clone(), params).await.unwrap();
    transformer.transform(img.clone(), params).await.unwrap();
    // Rejected before any work: zero width.
    let invalid = TransformParams::new(0, 40, ImageFormat::Jpeg, 80);
    transformer.transform(img.clone(), invalid).await.unwrap_err();

    // No generator is configured, so this fails upstream.
    engine
        .composer()
        .compose(
            "standard",
            "728x90",
            TextLayers::catch_copy("hello"),
            None,
            BannerSettings::default(),
        )
        .await
        .unwrap_err();
    engine
        .composer()
        .compose(
            "standard",
            "728x90",
            TextLayers::catch_copy("hello"),
            Some(png(728, 90)),
            BannerSettings::default(),
        )
        .await
        .unwrap();

    engine.teardown().await;

    let keys: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for expected in [
        image_metrics::DURATION,
        image_metrics::SIZE,
        image_metrics::ERRORS,
        banner_metrics::DURATION,
        banner_metrics::SIZE,
        banner_metrics::ERRORS,
        "kirie_cache_hit_total",
        "kirie_cache_miss_total",
        "kirie_cache_keys",
        "kirie_cache_evict_total",
        "kirie_executor_active",
        "kirie_executor_queue_wait_ms",
    ] {
        assert!(keys.contains(expected), "missing metric key: {expected}");
    }
}
