//! Takeover Arbiter: serializes concurrent CONNECTs sharing a client
//! identifier so at most one channel per identifier is ever live.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::admission::channel::ChannelHandle;
use crate::admission::extensions::ChannelRegistry;

const MAX_TAKEOVER_RETRIES: u32 = 100;

/// A fixed-width array of stripe locks keyed by `hash(client_id) % len`.
/// Used only to serialize the read-then-displace sequence in
/// `take_over`; it is never reused for any other purpose.
pub struct TakeoverArbiter {
    stripes: Vec<Mutex<()>>,
}

impl TakeoverArbiter {
    pub fn new(parallelism: usize) -> Self {
        let stripe_count = (16 * parallelism.max(1)).max(1);
        let mut stripes = Vec::with_capacity(stripe_count);
        stripes.resize_with(stripe_count, || Mutex::new(()));
        Self { stripes }
    }

    fn stripe_index(&self, client_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        client_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Displaces any live channel registered under `client_id` and waits
    /// for it to fully close before returning. A no-op if no channel is
    /// currently registered.
    pub async fn take_over(&self, client_id: &str, registry: &dyn ChannelRegistry) {
        let mut retries = 0;

        loop {
            let stripe = &self.stripes[self.stripe_index(client_id)];
            let existing = {
                let _guard = stripe.lock().await;

                let Some(prior) = registry.get(client_id).await else {
                    return;
                };

                if prior.is_taken_over() {
                    // Someone else is already displacing this channel.
                    Some(prior)
                } else {
                    prior.mark_taken_over();
                    prior.close();
                    info!(
                        client_id,
                        "another client connected with the same client id"
                    );
                    return self.wait_for_close(prior).await;
                }
            };

            let Some(prior) = existing else { return };

            if retries >= MAX_TAKEOVER_RETRIES {
                // Safety net: force displacement rather than wait forever
                // on a completion we may have missed.
                prior.close();
                return;
            }

            retries += 1;
            prior.disconnect_future().await;
            // Loop again: the registry entry should now be gone or
            // replaced by the connection that won the race.
        }
    }

    async fn wait_for_close(&self, prior: ChannelHandle) {
        prior.disconnect_future().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemoryRegistry {
        channels: StdMutex<HashMap<String, ChannelHandle>>,
    }

    #[async_trait]
    impl ChannelRegistry for InMemoryRegistry {
        async fn get(&self, client_id: &str) -> Option<ChannelHandle> {
            self.channels.lock().unwrap().get(client_id).cloned()
        }

        async fn persist(&self, client_id: &str, channel: ChannelHandle) {
            self.channels
                .lock()
                .unwrap()
                .insert(client_id.to_string(), channel);
        }

        async fn remove(&self, client_id: &str) {
            self.channels.lock().unwrap().remove(client_id);
        }
    }

    #[tokio::test]
    async fn no_prior_channel_returns_immediately() {
        let arbiter = TakeoverArbiter::new(2);
        let registry = InMemoryRegistry::default();
        arbiter.take_over("c1", &registry).await;
    }

    #[tokio::test]
    async fn displaces_live_channel_and_waits_for_close() {
        let arbiter = TakeoverArbiter::new(2);
        let registry = InMemoryRegistry::default();

        let prior = ChannelHandle::new(Arc::from("c1"));
        registry.persist("c1", prior.clone()).await;

        assert!(!prior.is_taken_over());

        arbiter.take_over("c1", &registry).await;

        assert!(prior.is_taken_over());
    }

    #[tokio::test]
    async fn second_takeover_on_already_displaced_channel_does_not_hang() {
        let arbiter = Arc::new(TakeoverArbiter::new(2));
        let registry = Arc::new(InMemoryRegistry::default());

        let prior = ChannelHandle::new(Arc::from("c1"));
        registry.persist("c1", prior.clone()).await;

        let arbiter2 = Arc::clone(&arbiter);
        let registry2 = Arc::clone(&registry);
        let handle = tokio::spawn(async move {
            arbiter2.take_over("c1", registry2.as_ref()).await;
        });

        // Give the spawned takeover a chance to mark `taken_over` before a
        // second concurrent attempt races it.
        tokio::task::yield_now().await;
        arbiter.take_over("c1", registry.as_ref()).await;

        handle.await.unwrap();
        assert!(prior.is_taken_over());
    }
}
