//! Webhook ingestion pipeline.
//!
//! One path for every provider: resolve the provider row, map the payload
//! through its adapter, normalize both numbers, resolve the recipient against
//! the pool's directory, classify, persist, fan out. Failures are returned to
//! the webhook responder; nothing is retried here — provider-side retry is
//! the provider's job.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::classify;
use crate::error::IngestError;
use crate::hub::events::{Event, Topic};
use crate::hub::registry::NotificationHub;
use crate::ingest::adapters::{AdapterRegistry, RawPayload};
use crate::messages::model::{Message, NewMessage};
use crate::pool::model::{PhoneNumber, normalize_number};
use crate::store::Store;

pub struct WebhookIngestor {
    store: Arc<dyn Store>,
    hub: Arc<NotificationHub>,
    adapters: AdapterRegistry,
}

impl WebhookIngestor {
    pub fn new(store: Arc<dyn Store>, hub: Arc<NotificationHub>) -> Arc<Self> {
        Arc::new(Self {
            store,
            hub,
            adapters: AdapterRegistry::with_defaults(),
        })
    }

    pub fn with_adapters(
        store: Arc<dyn Store>,
        hub: Arc<NotificationHub>,
        adapters: AdapterRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            hub,
            adapters,
        })
    }

    /// Process one inbound SMS webhook delivery. Returns the message id —
    /// the original one if this delivery turned out to be a duplicate.
    pub async fn ingest(
        &self,
        provider_name: &str,
        payload: &RawPayload,
    ) -> Result<Uuid, IngestError> {
        let provider_name = provider_name.to_lowercase();

        let provider = self
            .store
            .get_provider_by_name(&provider_name)
            .await?
            .ok_or_else(|| IngestError::UnknownProvider(provider_name.clone()))?;
        if !provider.is_active {
            return Err(IngestError::ProviderInactive(provider_name.clone()));
        }

        let adapter = self.adapters.resolve(&provider_name);
        let sms = adapter.extract(payload)?;

        let sender = normalize_number(&sms.sender);
        let recipient = normalize_number(&sms.recipient);

        let number = self
            .store
            .get_number_by_e164(&recipient)
            .await?
            .ok_or_else(|| {
                warn!(recipient = %recipient, provider = %provider_name, "Unregistered recipient");
                IngestError::UnregisteredNumber(recipient.clone())
            })?;

        // At-most-once insert per (provider, provider message id).
        if let Some(ref provider_message_id) = sms.provider_message_id {
            if let Some(existing) = self
                .store
                .find_message_by_provider_ref(provider.id, provider_message_id)
                .await?
            {
                info!(
                    message_id = %existing.id,
                    provider = %provider_name,
                    provider_message_id = %provider_message_id,
                    "Duplicate webhook delivery ignored"
                );
                return Ok(existing.id);
            }
        }

        let category = classify::classify(&sms.body);
        let message = self
            .store
            .insert_message(&NewMessage {
                phone_number_id: number.id,
                sender_number: sender,
                content: sms.body,
                category,
                provider_id: Some(provider.id),
                provider_message_id: sms.provider_message_id,
                metadata: serde_json::json!({ "provider": provider_name.as_str() }),
            })
            .await?;

        info!(
            message_id = %message.id,
            number = %number.phone_number,
            category = %category,
            provider = %provider_name,
            "Message ingested"
        );

        self.publish_new_message(&number, &message).await;
        Ok(message.id)
    }

    /// Dev/test injection path: create a message for a registered number
    /// without going through a provider adapter.
    pub async fn inject(
        &self,
        recipient: &str,
        sender: &str,
        content: &str,
    ) -> Result<Uuid, IngestError> {
        let recipient = normalize_number(recipient);
        let number = self
            .store
            .get_number_by_e164(&recipient)
            .await?
            .ok_or_else(|| IngestError::UnregisteredNumber(recipient.clone()))?;

        let category = classify::classify(content);
        let message = self
            .store
            .insert_message(&NewMessage {
                phone_number_id: number.id,
                sender_number: normalize_number(sender),
                content: content.to_string(),
                category,
                provider_id: None,
                provider_message_id: None,
                metadata: serde_json::json!({ "injected": true }),
            })
            .await?;

        info!(message_id = %message.id, number = %number.phone_number, "Test message injected");
        self.publish_new_message(&number, &message).await;
        Ok(message.id)
    }

    /// Fan out a new-message event. A number between leases has no holder;
    /// only the per-number topic hears about its traffic then. Best-effort —
    /// delivery failures never fail the ingestion.
    async fn publish_new_message(&self, number: &PhoneNumber, message: &Message) {
        let event = Event::NewMessage {
            message: message.clone(),
        };
        if let Some(ref holder) = number.holder {
            self.hub
                .publish(&Topic::User(holder.clone()), event.clone())
                .await;
        }
        self.hub.publish(&Topic::Number(number.id), event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Category;
    use crate::messages::model::MessageFilter;
    use crate::providers::SmsProvider;
    use crate::store::LibSqlStore;

    struct Harness {
        store: Arc<dyn Store>,
        hub: Arc<NotificationHub>,
        ingestor: Arc<WebhookIngestor>,
        twilio: SmsProvider,
    }

    async fn harness() -> Harness {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let hub = NotificationHub::new();
        let twilio = SmsProvider::new("twilio", 1);
        store.seed_provider(&twilio).await.unwrap();
        let ingestor = WebhookIngestor::new(Arc::clone(&store), Arc::clone(&hub));
        Harness {
            store,
            hub,
            ingestor,
            twilio,
        }
    }

    async fn register_number(store: &Arc<dyn Store>, e164: &str) -> PhoneNumber {
        let number = PhoneNumber::new(e164, "US");
        store.insert_number(&number).await.unwrap();
        number
    }

    fn twilio_payload(to: &str, body: &str, sid: &str) -> RawPayload {
        RawPayload::from_pairs([
            ("From", "+19998887777"),
            ("To", to),
            ("Body", body),
            ("MessageSid", sid),
        ])
    }

    #[tokio::test]
    async fn ingest_creates_classified_message() {
        let h = harness().await;
        let number = register_number(&h.store, "+15551230001").await;

        let id = h
            .ingestor
            .ingest("twilio", &twilio_payload("+15551230001", "Your code: 482910", "SM1"))
            .await
            .unwrap();

        let message = h.store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.phone_number_id, number.id);
        assert_eq!(message.category, Category::Otp);
        assert_eq!(message.sender_number, "+19998887777");
        assert_eq!(message.provider_id, Some(h.twilio.id));
        assert!(!message.is_read);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let h = harness().await;
        register_number(&h.store, "+15551230001").await;

        let err = h
            .ingestor
            .ingest("carrier-pigeon", &twilio_payload("+15551230001", "hi", "SM1"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn inactive_provider_is_rejected() {
        let h = harness().await;
        register_number(&h.store, "+15551230001").await;
        let mut inactive = SmsProvider::new("legacy", 9);
        inactive.is_active = false;
        h.store.seed_provider(&inactive).await.unwrap();

        let payload = RawPayload::from_pairs([("from", "+1"), ("to", "+15551230001"), ("text", "x")]);
        let err = h.ingestor.ingest("legacy", &payload).await.unwrap_err();
        assert!(matches!(err, IngestError::ProviderInactive(_)));
    }

    #[tokio::test]
    async fn unregistered_recipient_creates_no_message() {
        let h = harness().await;

        let err = h
            .ingestor
            .ingest("twilio", &twilio_payload("+15550000000", "hi", "SM1"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnregisteredNumber(_)));

        // Nothing was persisted for anyone.
        let number = register_number(&h.store, "+15550000000").await;
        assert_eq!(h.store.count_messages_for_number(number.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recipient_numbers_are_normalized_before_lookup() {
        let h = harness().await;
        register_number(&h.store, "+15551230001").await;

        // Provider sends the number with formatting noise.
        let id = h
            .ingestor
            .ingest("twilio", &twilio_payload("+1 (555) 123-0001", "hi", "SM1"))
            .await
            .unwrap();
        assert!(h.store.get_message(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_delivery_returns_original_id() {
        let h = harness().await;
        register_number(&h.store, "+15551230001").await;

        let payload = twilio_payload("+15551230001", "hi", "SM-dup");
        let first = h.ingestor.ingest("twilio", &payload).await.unwrap();
        let second = h.ingestor.ingest("twilio", &payload).await.unwrap();
        assert_eq!(first, second);

        let number = h
            .store
            .get_number_by_e164("+15551230001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.store.count_messages_for_number(number.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn publishes_to_holder_and_number_topics() {
        let h = harness().await;
        let number = register_number(&h.store, "+15551230001").await;
        let now = chrono::Utc::now();
        h.store
            .try_assign_number(number.id, "alice", now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        let (_user_conn, mut user_rx) = h.hub.register("alice").await;
        let (watcher_conn, mut watcher_rx) = h.hub.register("watcher").await;
        h.hub.subscribe(watcher_conn, Topic::Number(number.id)).await;

        h.ingestor
            .ingest("twilio", &twilio_payload("+15551230001", "hello", "SM1"))
            .await
            .unwrap();

        assert!(matches!(user_rx.recv().await, Some(Event::NewMessage { .. })));
        assert!(matches!(watcher_rx.recv().await, Some(Event::NewMessage { .. })));
    }

    #[tokio::test]
    async fn holderless_number_only_reaches_number_topic() {
        let h = harness().await;
        let number = register_number(&h.store, "+15551230001").await;

        let (watcher_conn, mut watcher_rx) = h.hub.register("watcher").await;
        h.hub.subscribe(watcher_conn, Topic::Number(number.id)).await;

        h.ingestor
            .ingest("twilio", &twilio_payload("+15551230001", "between leases", "SM1"))
            .await
            .unwrap();

        assert!(matches!(watcher_rx.recv().await, Some(Event::NewMessage { .. })));
    }

    #[tokio::test]
    async fn nexmo_payload_round_trip() {
        let h = harness().await;
        h.store
            .seed_provider(&SmsProvider::new("nexmo", 2))
            .await
            .unwrap();
        register_number(&h.store, "+15551230001").await;

        let payload = RawPayload::from_pairs([
            ("msisdn", "19998887777"),
            ("to", "15551230001"),
            ("text", "Please verify your account"),
            ("messageId", "0A01"),
        ]);
        let id = h.ingestor.ingest("nexmo", &payload).await.unwrap();
        let message = h.store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.category, Category::Verification);
        assert_eq!(message.sender_number, "+19998887777");
    }

    #[tokio::test]
    async fn inject_skips_provider_checks() {
        let h = harness().await;
        register_number(&h.store, "+15551230001").await;
        let now = chrono::Utc::now();

        let id = h
            .ingestor
            .inject("+15551230001", "+10000000000", "Hey, lunch at noon?")
            .await
            .unwrap();
        let message = h.store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.category, Category::Sms);
        assert!(message.provider_id.is_none());
        assert!(message.received_at >= now - chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn ingested_message_visible_in_holder_queries() {
        let h = harness().await;
        let number = register_number(&h.store, "+15551230001").await;
        let now = chrono::Utc::now();
        h.store
            .try_assign_number(number.id, "alice", now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        h.ingestor
            .ingest("twilio", &twilio_payload("+15551230001", "hello", "SM1"))
            .await
            .unwrap();

        let listed = h
            .store
            .list_messages(&MessageFilter::for_user("alice"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }
}
