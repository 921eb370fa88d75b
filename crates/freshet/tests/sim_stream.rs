//! Smoke run against the synthetic live producer: a steady stream comes
//! out ordered and gap-free under healthy network conditions.

use std::{sync::Arc, time::Duration};

use freshet::{Consumer, ConsumerOptions, FrameOut};
use freshet_core::{Name, NamespaceInfo};
use freshet_net::AcceptAll;
use freshet_testing::{SimProducerFace, SimProducerOptions};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn steady_stream_plays_in_order() {
    let producer = SimProducerFace::new(SimProducerOptions {
        latency: Duration::from_millis(15),
        ..SimProducerOptions::default()
    });
    let prefix =
        NamespaceInfo::parse(&Name::from_uri("/sim/ndnrtc/v=4/video/cam/hi").unwrap()).unwrap();

    let consumer = Consumer::new(
        ConsumerOptions::new(prefix).with_fec(true),
        Arc::new(producer),
        Arc::new(AcceptAll),
    );
    let cancel = CancellationToken::new();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut sink = move |frame: FrameOut| {
        let _ = tx.send(frame);
    };

    let collector = {
        let cancel = cancel.clone();
        async move {
            let mut got: Vec<FrameOut> = Vec::new();
            while got.len() < 20 {
                match rx.recv().await {
                    Some(frame) => got.push(frame),
                    None => break,
                }
            }
            cancel.cancel();
            got
        }
    };

    let (run, frames) = tokio::join!(consumer.run(&mut sink, cancel.clone()), collector);
    run.unwrap();

    assert_eq!(frames.len(), 20);
    for pair in frames.windows(2) {
        assert!(
            pair[1].sample_no > pair[0].sample_no,
            "samples must play in order: {} then {}",
            pair[0].sample_no,
            pair[1].sample_no
        );
        assert!(pair[1].timestamp_ms > pair[0].timestamp_ms);
    }
    // Healthy network: consecutive samples, no gaps.
    assert_eq!(
        frames.last().unwrap().sample_no - frames[0].sample_no,
        19,
        "no gaps expected on a healthy run"
    );
    assert!(frames.iter().all(|f| !f.bytes.is_empty()));
}
