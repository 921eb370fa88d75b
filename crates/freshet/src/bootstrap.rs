#![forbid(unsafe_code)]

use std::time::Duration;

use freshet_core::{markers, LatestPointer, LiveMeta, NameFilter, NamespaceInfo, StreamMeta};
use freshet_net::{CompletionStream, DataRequest, Interest, RequestQueue, RequestStatus};
use tracing::{debug, trace};

use crate::error::{ConsumerError, ConsumerResult};

/// Everything the engine needs to start fetching, derived from the three
/// bootstrap records.
#[derive(Clone, Debug)]
pub struct BootstrapInfo {
    pub live: LiveMeta,
    pub stream: StreamMeta,
    /// Newest sample the producer had published when `_latest` answered.
    pub latest_sample: u64,
    /// DRD of the `_live` fetch, the first network delay observation.
    pub live_drd: Duration,
    pub sample_period: Duration,
    /// `W₀ = max(3, ceil(drd / sample_period))`.
    pub initial_window: usize,
    /// First sample the pipeline will request:
    /// `latest + ceil(W₀ / 2)` hides the one-way fetch delay.
    pub start_sample: u64,
}

/// Fetch `_live`, `_latest` and `_meta` concurrently with
/// `MustBeFresh`. The barrier completes when all three carry Data; any
/// terminal failure fails the bootstrap.
pub async fn bootstrap(
    queue: &mut RequestQueue,
    completions: &mut CompletionStream,
    prefix: &NamespaceInfo,
    lifetime: Duration,
) -> ConsumerResult<BootstrapInfo> {
    let stream_prefix = prefix.prefix(NameFilter::Stream);
    let requests = [markers::LIVE, markers::LATEST, markers::META]
        .into_iter()
        .map(|marker| {
            DataRequest::new(Interest::fresh(
                stream_prefix.clone().with_str(marker),
                lifetime,
            ))
            .map_err(ConsumerError::from)
        })
        .collect::<ConsumerResult<Vec<_>>>()?;
    queue.enqueue(requests);

    let mut live: Option<(LiveMeta, Duration)> = None;
    let mut stream: Option<StreamMeta> = None;
    let mut latest: Option<u64> = None;

    while live.is_none() || stream.is_none() || latest.is_none() {
        let raw = completions.recv().await?;
        let Some(done) = queue.finalize(raw) else {
            continue;
        };
        if done.status() != RequestStatus::Data {
            return Err(ConsumerError::BootstrapFailed(format!(
                "{} -> {:?}",
                done.interest().name,
                done.status()
            )));
        }

        let payload = done.payload().cloned().unwrap_or_default();
        let info = done.info();
        if info.is_live {
            let meta = LiveMeta::decode(&mut payload.clone())
                .map_err(|err| ConsumerError::BootstrapFailed(format!("live meta: {err}")))?;
            let drd = done.drd().unwrap_or_default();
            trace!(framerate = meta.framerate, ?drd, "live meta fetched");
            live = Some((meta, drd));
        } else if info.is_latest {
            let pointer = LatestPointer::decode(&mut payload.clone())
                .map_err(|err| ConsumerError::BootstrapFailed(format!("latest pointer: {err}")))?;
            let sample = pointer.latest_sample().ok_or_else(|| {
                ConsumerError::BootstrapFailed("latest pointer has no delegation".into())
            })?;
            trace!(sample, "latest pointer fetched");
            latest = Some(sample);
        } else if info.is_meta {
            let meta = StreamMeta::decode(&mut payload.clone())
                .map_err(|err| ConsumerError::BootstrapFailed(format!("stream meta: {err}")))?;
            trace!(codec = %meta.codec, "stream meta fetched");
            stream = Some(meta);
        }
    }

    let (live, live_drd) = live.expect("loop invariant");
    let latest_sample = latest.expect("loop invariant");
    let sample_period = live.sample_period();

    let pp_est = live_drd.as_secs_f64() / sample_period.as_secs_f64();
    let initial_window = (pp_est.ceil() as usize).max(3);
    // Half the window hides the one-way delay: the first Interest reaches
    // the producer as its sample is being produced.
    let start_sample = latest_sample + (initial_window as u64).div_ceil(2);

    debug!(
        latest_sample,
        initial_window, start_sample, "bootstrap complete"
    );

    Ok(BootstrapInfo {
        live,
        stream: stream.expect("loop invariant"),
        latest_sample,
        live_drd,
        sample_period,
        initial_window,
        start_sample,
    })
}
