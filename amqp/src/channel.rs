//! `lapin`-backed connector, channel and acknowledger.

use crate::settings::AmqpSettings;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Connection};
use order_relay_core::broker::{
    Acknowledger, BoxFuture, BrokerChannel, BrokerError, ConnectionError, Connector, Delivery,
    DeliveryStream, PublishProperties, QueueSpec,
};

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Opens connections to a RabbitMQ-compatible broker.
///
/// Every [`connect`](Connector::connect) opens one connection and one channel on it,
/// with publisher confirms enabled.
#[derive(Clone, Debug)]
pub struct AmqpConnector {
    settings: AmqpSettings,
}

impl AmqpConnector {
    /// Create a connector; nothing is opened until `connect`.
    #[must_use]
    pub const fn new(settings: AmqpSettings) -> Self {
        Self { settings }
    }

    /// The settings in use.
    #[must_use]
    pub const fn settings(&self) -> &AmqpSettings {
        &self.settings
    }

    async fn open(&self) -> Result<AmqpChannel, ConnectionError> {
        let target = self.settings.redacted();
        let unreachable = |reason: String| ConnectionError::Unreachable {
            target: target.clone(),
            reason,
        };

        let uri = self.settings.uri().map_err(|e| unreachable(e.to_string()))?;
        let connection = Connection::connect_uri(uri, self.settings.properties())
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let channel = close_on_error(open_channel(&connection).await, async {
            let _ = connection.close(REPLY_SUCCESS, "OK").await;
        })
        .await?;

        tracing::debug!(
            broker = %target,
            channel_id = channel.id(),
            "AMQP connection and channel opened"
        );
        Ok(AmqpChannel {
            connection,
            channel,
        })
    }
}

/// Create the single channel of `connection` with publisher confirms enabled.
async fn open_channel(connection: &Connection) -> Result<lapin::Channel, ConnectionError> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| ConnectionError::ChannelNotEstablished(e.to_string()))?;
    if !channel.status().connected() {
        return Err(ConnectionError::ChannelNotEstablished(
            "broker returned a closed channel".to_string(),
        ));
    }

    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| ConnectionError::ChannelNotEstablished(format!("confirm_select: {e}")))?;
    Ok(channel)
}

/// Run `cleanup` before returning a failed `result`; a success passes through untouched.
async fn close_on_error<T, E>(
    result: Result<T, E>,
    cleanup: impl std::future::Future<Output = ()>,
) -> Result<T, E> {
    if result.is_err() {
        cleanup.await;
    }
    result
}

impl Connector for AmqpConnector {
    type Channel = AmqpChannel;

    fn connect(&self) -> BoxFuture<'_, Result<Self::Channel, ConnectionError>> {
        Box::pin(self.open())
    }

    fn target(&self) -> String {
        self.settings.redacted()
    }
}

/// An open AMQP connection with a single channel.
pub struct AmqpChannel {
    connection: Connection,
    channel: lapin::Channel,
}

impl AmqpChannel {
    /// Map a lapin failure, reporting a dead channel as [`BrokerError::ChannelClosed`].
    fn classify(&self, error: &lapin::Error, otherwise: impl FnOnce(String) -> BrokerError) -> BrokerError {
        if self.is_open() {
            otherwise(error.to_string())
        } else {
            BrokerError::ChannelClosed(error.to_string())
        }
    }
}

impl std::fmt::Debug for AmqpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpChannel")
            .field("channel_id", &self.channel.id())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Queue arguments routing rejected messages to `dead_letter` through the default exchange.
fn dead_letter_arguments(dead_letter: &str) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString(String::new().into()),
    );
    arguments.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(dead_letter.to_string().into()),
    );
    arguments
}

fn basic_properties(properties: &PublishProperties) -> BasicProperties {
    let mut basic = BasicProperties::default()
        .with_content_type(ShortString::from(properties.content_type.clone()));
    if properties.persistent {
        basic = basic.with_delivery_mode(PERSISTENT);
    }
    if let Some(id) = &properties.message_id {
        basic = basic.with_message_id(ShortString::from(id.clone()));
    }
    basic
}

impl BrokerChannel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    fn declare_queue<'a>(&'a self, spec: &'a QueueSpec) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let options = || QueueDeclareOptions {
                durable: spec.durable,
                ..QueueDeclareOptions::default()
            };
            let declare_failed = |queue: &str| {
                let queue = queue.to_string();
                move |reason: String| BrokerError::DeclareFailed { queue, reason }
            };

            let arguments = match &spec.dead_letter {
                Some(dead_letter) => {
                    self.channel
                        .queue_declare(dead_letter, options(), FieldTable::default())
                        .await
                        .map_err(|e| self.classify(&e, declare_failed(dead_letter.as_str())))?;
                    dead_letter_arguments(dead_letter)
                },
                None => FieldTable::default(),
            };

            self.channel
                .queue_declare(&spec.name, options(), arguments)
                .await
                .map_err(|e| self.classify(&e, declare_failed(spec.name.as_str())))?;

            tracing::debug!(
                queue = %spec.name,
                durable = spec.durable,
                dead_letter = spec.dead_letter.as_deref().unwrap_or(""),
                "Queue declared"
            );
            Ok(())
        })
    }

    fn publish<'a>(
        &'a self,
        queue: &'a str,
        payload: &'a [u8],
        properties: &'a PublishProperties,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let confirm = self
                .channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    payload,
                    basic_properties(properties),
                )
                .await
                .map_err(|e| self.classify(&e, BrokerError::Transport))?;

            match confirm.await.map_err(|e| self.classify(&e, BrokerError::Transport))? {
                Confirmation::Nack(_) => Err(BrokerError::Rejected(queue.to_string())),
                Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
            }
        })
    }

    fn consume<'a>(
        &'a self,
        queue: &'a str,
        consumer_tag: &'a str,
        prefetch: u16,
    ) -> BoxFuture<'a, Result<DeliveryStream, BrokerError>> {
        Box::pin(async move {
            let consume_failed = |reason: String| BrokerError::ConsumeFailed {
                queue: queue.to_string(),
                reason,
            };

            self.channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| self.classify(&e, consume_failed))?;

            let consumer = self
                .channel
                .basic_consume(
                    queue,
                    consumer_tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| self.classify(&e, consume_failed))?;

            let stream = consumer.map(|item| match item {
                Ok(delivery) => Ok(Delivery::new(
                    delivery.data,
                    delivery.delivery_tag,
                    delivery.redelivered,
                    AmqpAcker(delivery.acker),
                )),
                Err(e) => Err(BrokerError::Transport(e.to_string())),
            });
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }

    fn cancel<'a>(&'a self, consumer_tag: &'a str) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            self.channel
                .basic_cancel(consumer_tag, BasicCancelOptions::default())
                .await
                .map_err(|e| {
                    self.classify(&e, |reason: String| BrokerError::ConsumeFailed {
                        queue: consumer_tag.to_string(),
                        reason,
                    })
                })
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let channel = if self.channel.status().connected() {
                self.channel.close(REPLY_SUCCESS, "OK").await
            } else {
                Ok(())
            };
            let connection = if self.connection.status().connected() {
                self.connection.close(REPLY_SUCCESS, "OK").await
            } else {
                Ok(())
            };

            channel
                .and(connection)
                .map_err(|e| BrokerError::ChannelClosed(e.to_string()))
        })
    }
}

/// Settles a lapin delivery.
struct AmqpAcker(lapin::acker::Acker);

impl Acknowledger for AmqpAcker {
    fn ack(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.0
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| BrokerError::AckFailed(e.to_string()))
        })
    }

    fn reject(&self, requeue: bool) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.0
                .nack(BasicNackOptions {
                    requeue,
                    ..BasicNackOptions::default()
                })
                .await
                .map_err(|e| BrokerError::AckFailed(e.to_string()))
        })
    }
}
