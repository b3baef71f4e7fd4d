use futures::StreamExt;
use kube::core::{ErrorResponse, WatchEvent};
use metrics::counter;
use stitch_core::{
    ChangeEvent, ChangeKind, DecodePolicy, Error, EventSink, ResourceItem, ResourceKind, Result, Selector,
    SubscriberState, Termination, WatchConfig, WatchSummary,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{decode, list_snapshot, ListerWatcher};

/// Change stream subscriber for one resource collection.
///
/// A single loop multiplexes the cancellation token and the event stream. Events
/// are dispatched one at a time in receive order; cancellation takes priority
/// over an event that is already waiting.
#[derive(Debug)]
pub struct Subscriber {
    kind: ResourceKind,
    policy: DecodePolicy,
    state: watch::Sender<SubscriberState>,
}

impl Subscriber {
    pub fn new(kind: ResourceKind, policy: DecodePolicy) -> Self {
        let (state, _) = watch::channel(SubscriberState::Idle);
        Self { kind, policy, state }
    }

    pub fn from_config(cfg: &WatchConfig) -> Self { Self::new(cfg.kind, cfg.decode_policy) }

    /// Observe state transitions of this subscriber.
    pub fn state(&self) -> watch::Receiver<SubscriberState> { self.state.subscribe() }

    fn transition(&self, next: SubscriberState) {
        let prev = self.state.send_replace(next);
        debug!(from = ?prev, to = ?next, "subscriber state");
    }

    /// Watch from `start_version` until cancelled, closed or errored.
    ///
    /// Never returns early with an error: every ending is reported through
    /// [`WatchSummary::termination`].
    pub async fn run<L, S>(
        &self,
        lw: &L,
        selector: &Selector,
        start_version: &str,
        cancel: &CancellationToken,
        sink: &mut S,
    ) -> WatchSummary
    where
        L: ListerWatcher + ?Sized,
        S: EventSink + ?Sized,
    {
        let mut summary = WatchSummary {
            termination: Termination::StreamClosed,
            resume_version: start_version.to_string(),
            dispatched: 0,
            skipped: 0,
        };

        self.transition(SubscriberState::Subscribing);
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = lw.watch(selector, start_version) => Some(res),
        };
        let mut stream = match opened {
            None => return self.finish(summary, Termination::Cancelled),
            Some(Err(e)) => return self.finish(summary, Termination::Errored(e)),
            Some(Ok(s)) => s,
        };

        self.transition(SubscriberState::Streaming);
        info!(kind = %self.kind, ns = ?selector.namespace, version = start_version, "watching");
        let termination = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Termination::Cancelled,
                next = stream.next() => next,
            };
            let decoded = match next {
                None => break Termination::StreamClosed,
                Some(Err(e @ Error::Decode { .. })) => Err(e),
                Some(Err(e)) => break Termination::Errored(e),
                Some(Ok(WatchEvent::Added(o))) => decode(self.kind, o).map(|item| (ChangeKind::Added, item)),
                Some(Ok(WatchEvent::Modified(o))) => decode(self.kind, o).map(|item| (ChangeKind::Modified, item)),
                Some(Ok(WatchEvent::Deleted(o))) => decode(self.kind, o).map(|item| (ChangeKind::Deleted, item)),
                Some(Ok(WatchEvent::Bookmark(b))) => {
                    debug!(version = %b.metadata.resource_version, "bookmark");
                    summary.resume_version = b.metadata.resource_version;
                    continue;
                }
                Some(Ok(WatchEvent::Error(e))) => break Termination::Errored(status_error(e)),
            };
            // Payloads the transport could not parse and payloads of the wrong type
            // both go through the decode policy.
            match decoded {
                Ok((change, item)) => self.dispatch(&mut summary, sink, change, item),
                Err(e) => match self.policy {
                    DecodePolicy::Terminate => break Termination::Errored(e),
                    DecodePolicy::Skip => {
                        warn!(error = %e, "skipping undecodable event");
                        counter!("stitch_decode_skipped_total", 1u64, "kind" => self.kind.plural());
                        summary.skipped += 1;
                    }
                },
            }
        };
        // Dropping the stream releases the connection.
        drop(stream);
        self.finish(summary, termination)
    }

    fn dispatch<S: EventSink + ?Sized>(&self, summary: &mut WatchSummary, sink: &mut S, kind: ChangeKind, item: ResourceItem) {
        summary.resume_version.clone_from(&item.resource_version);
        counter!("stitch_events_total", 1u64, "kind" => self.kind.plural(), "event" => kind.as_str());
        sink.dispatch(ChangeEvent { kind, item });
        summary.dispatched += 1;
    }

    fn finish(&self, mut summary: WatchSummary, termination: Termination) -> WatchSummary {
        counter!("stitch_watch_terminations_total", 1u64, "reason" => termination.as_str());
        match &termination {
            Termination::Cancelled => info!(dispatched = summary.dispatched, "watch cancelled"),
            Termination::StreamClosed => warn!(dispatched = summary.dispatched, resume = %summary.resume_version, "watch stream closed"),
            Termination::Errored(e) => warn!(error = %e, dispatched = summary.dispatched, "watch errored"),
        }
        self.transition(termination.state());
        summary.termination = termination;
        summary
    }
}

fn status_error(e: ErrorResponse) -> Error {
    if e.code == 410 {
        Error::Expired(e.message)
    } else {
        Error::transport(format!("watch error event {} ({}): {}", e.reason, e.code, e.message))
    }
}

/// List, hand the items to `on_snapshot`, then watch from the snapshot's version.
///
/// List failures are returned as `Err`; watch endings come back in the summary.
pub async fn list_then_watch<L, F, S>(
    lw: &L,
    cfg: &WatchConfig,
    subscriber: &Subscriber,
    cancel: &CancellationToken,
    on_snapshot: F,
    sink: &mut S,
) -> Result<WatchSummary>
where
    L: ListerWatcher + ?Sized,
    F: FnOnce(Vec<ResourceItem>),
    S: EventSink + ?Sized,
{
    cfg.validate()?;
    let snapshot = list_snapshot(lw, &cfg.selector, cfg.kind).await?;
    let version = snapshot.version;
    on_snapshot(snapshot.items);
    Ok(subscriber.run(lw, &cfg.selector, &version, cancel, sink).await)
}
