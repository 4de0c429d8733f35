//! Async embedding of the engine.
//!
//! `MdnsDriver` wraps an [`AgentHost`] in a lock, pumps its timer
//! queue from a background task, and exposes the engine's commands as
//! plain methods plus broadcast events. The transport attaches by
//! draining [`outbound_receiver`](MdnsDriver::outbound_receiver) and
//! feeding [`deliver`](MdnsDriver::deliver).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;

use shoal_common::error::Result;
use shoal_common::types::{ReplyAddress, ServiceInstance};

use crate::events::{ChannelSubscriber, InstanceEvent, SharedSubscriber};
use crate::host::{AgentHost, DiscoveryOptions, OutboundMessage};
use crate::prober::ProbeCallback;
use crate::resource::{Resource, Section};

const BROADCAST_CHANNEL_CAPACITY: usize = 256;

pub struct MdnsDriver {
    host: Arc<Mutex<AgentHost>>,
    event_tx: broadcast::Sender<InstanceEvent>,
    /// Wakes the pump after any command mutates the host.
    notify: Arc<Notify>,
    cancel: CancellationToken,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<OutboundMessage>>>,
}

impl MdnsDriver {
    /// Start a driver named after this device's hostname.
    pub fn new() -> Result<Self> {
        let host_name = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self::with_host_name(&host_name)
    }

    pub fn with_host_name(host_name: &str) -> Result<Self> {
        let host = Arc::new(Mutex::new(AgentHost::new(host_name)?));
        let (event_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        tracing::info!(host_name, "mdns driver starting");
        tokio::spawn(pump(
            Arc::clone(&host),
            outbound_tx,
            Arc::clone(&notify),
            cancel.clone(),
        ));

        Ok(Self {
            host,
            event_tx,
            notify,
            cancel,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        })
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn subscribe_to_service(
        &self,
        service_name: &str,
        subscriber: SharedSubscriber,
        options: DiscoveryOptions,
    ) -> Result<()> {
        self.host
            .lock()
            .unwrap()
            .subscribe_to_service(service_name, subscriber, options)?;
        self.notify.notify_one();
        Ok(())
    }

    /// Subscribe and receive discovery events over the driver's
    /// broadcast channel instead of a [`Subscriber`] impl.
    ///
    /// [`Subscriber`]: crate::events::Subscriber
    pub fn subscribe_events_to_service(
        &self,
        service_name: &str,
        options: DiscoveryOptions,
    ) -> Result<broadcast::Receiver<InstanceEvent>> {
        let subscriber: SharedSubscriber =
            Arc::new(Mutex::new(ChannelSubscriber::new(self.event_tx.clone())));
        self.subscribe_to_service(service_name, subscriber, options)?;
        Ok(self.event_tx.subscribe())
    }

    pub fn unsubscribe_from_service(&self, service_name: &str, subscriber: &SharedSubscriber) {
        self.host
            .lock()
            .unwrap()
            .unsubscribe_from_service(service_name, subscriber);
        self.notify.notify_one();
    }

    /// Resolve one named instance. Returns `None` when nothing was
    /// learned before the timeout.
    pub async fn resolve_service_instance(
        &self,
        service_name: &str,
        instance_name: &str,
        timeout: Duration,
        options: DiscoveryOptions,
    ) -> Result<Option<ServiceInstance>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut host = self.host.lock().unwrap();
            // Deadlines are computed from the host clock; bring it up
            // to date first.
            host.advance_to(Instant::now());
            host.resolve_service_instance(
                service_name,
                instance_name,
                timeout,
                options,
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            )?;
        }
        self.notify.notify_one();
        Ok(rx.await.unwrap_or(None))
    }

    /// Probe whether an instance name is free. Returns `false` when
    /// another responder already claims it.
    pub async fn probe_service_instance(
        &self,
        service_name: &str,
        instance_name: &str,
        port: u16,
        options: DiscoveryOptions,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        let callback: ProbeCallback = Box::new(move |free| {
            let _ = tx.send(free);
        });
        {
            let mut host = self.host.lock().unwrap();
            host.advance_to(Instant::now());
            host.probe_service_instance(service_name, instance_name, port, options, callback)?;
        }
        self.notify.notify_one();
        Ok(rx.await.unwrap_or(false))
    }

    // ── Local publications ───────────────────────────────────────────

    pub fn add_local_service_instance(&self, instance: ServiceInstance, from_proxy: bool) {
        self.host
            .lock()
            .unwrap()
            .on_add_local_service_instance(instance, from_proxy);
        self.notify.notify_one();
    }

    pub fn change_local_service_instance(&self, instance: ServiceInstance, from_proxy: bool) {
        self.host
            .lock()
            .unwrap()
            .on_change_local_service_instance(instance, from_proxy);
        self.notify.notify_one();
    }

    pub fn remove_local_service_instance(
        &self,
        service_name: &str,
        instance_name: &str,
        from_proxy: bool,
    ) {
        self.host.lock().unwrap().on_remove_local_service_instance(
            service_name,
            instance_name,
            from_proxy,
        );
        self.notify.notify_one();
    }

    // ── Transport attachment ─────────────────────────────────────────

    /// Feed one decoded inbound message.
    pub fn deliver(&self, records: &[(Resource, Section)], sender: ReplyAddress) {
        self.host.lock().unwrap().receive_message(records, sender);
        self.notify.notify_one();
    }

    /// The stream of outbound messages for the transport. Yields the
    /// receiver once; later calls return `None`.
    pub fn outbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<OutboundMessage>> {
        self.outbound_rx.lock().unwrap().take()
    }

    /// Observe all driver events without subscribing to a service.
    pub fn subscribe_events(&self) -> broadcast::Receiver<InstanceEvent> {
        self.event_tx.subscribe()
    }

    pub fn shutdown(&self) {
        tracing::debug!("mdns driver shutting down");
        self.cancel.cancel();
    }
}

impl Drop for MdnsDriver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Pump loop: advance the host to the current time, forward outbound
/// messages, then sleep until the next timer or command.
async fn pump(
    host: Arc<Mutex<AgentHost>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let (next_wake, outbound) = {
            let mut host = host.lock().unwrap();
            host.advance_to(Instant::now());
            (host.next_wake(), host.take_outbound())
        };
        for message in outbound {
            if outbound_tx.send(message).is_err() {
                // Transport dropped its receiver; keep pumping timers.
                break;
            }
        }

        tokio::select! {
            _ = async {
                match next_wake {
                    Some(when) => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(when)).await
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {}
            _ = notify.notified() => {}
            _ = cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{DnsType, Question};
    use crate::OutboundItem;

    #[tokio::test]
    async fn subscription_emits_initial_query() {
        let driver = MdnsDriver::with_host_name("test-host").unwrap();
        let mut outbound = driver.outbound_receiver().unwrap();

        let _events = driver
            .subscribe_events_to_service("_http._tcp.", DiscoveryOptions::default())
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), outbound.recv())
            .await
            .expect("no outbound message before timeout")
            .expect("outbound channel closed");
        assert_eq!(
            message.item,
            OutboundItem::Question(Question {
                name: "_http._tcp.local.".to_string(),
                dns_type: DnsType::Ptr,
            })
        );
        driver.shutdown();
    }

    #[tokio::test]
    async fn resolve_times_out_with_none() {
        let driver = MdnsDriver::with_host_name("test-host").unwrap();
        let result = driver
            .resolve_service_instance(
                "_http._tcp.",
                "nosuch",
                Duration::from_millis(50),
                DiscoveryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result, None);
        driver.shutdown();
    }

    #[tokio::test]
    async fn invalid_service_name_is_rejected() {
        let driver = MdnsDriver::with_host_name("test-host").unwrap();
        let result = driver.subscribe_events_to_service("http._tcp.", DiscoveryOptions::default());
        assert!(result.is_err());
        driver.shutdown();
    }
}
