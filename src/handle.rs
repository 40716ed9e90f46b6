//! Generic decode-and-dispatch helper.
//!
//! [`handle_message`] decodes a message's binary payload into a fresh typed
//! target and invokes the provided handler with the message's context. The
//! acknowledgement policy: a message is ack'ed whenever further delivery
//! attempts cannot help — the payload is undecodable, or the handler has
//! already processed it. It is nack'ed only on handler failure, which is
//! presumed transient, so the transport redelivers.
//!
//! If decoding fails the message is ack'ed ("get rid of it", a malformed
//! payload will not self-correct on redelivery) and the decode error is
//! returned. If the handler fails the message is nack'ed and *no* error is
//! returned — logging that failure is the handler's own responsibility.

use std::error::Error;
use std::fmt;
use std::future::Future;

use serde::de::DeserializeOwned;

use crate::message::{Message, MessageContext};

/// Error type for [`handle_message`].
#[derive(Debug)]
pub enum HandleError {
    /// The payload could not be decoded into the target type. The message
    /// has already been ack'ed — it can never be processed correctly.
    Decode(String),
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleError::Decode(msg) => write!(f, "decode failed: {}", msg),
        }
    }
}

impl Error for HandleError {}

/// Decode a binary payload into a typed value.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, bitcode::Error> {
    bitcode::deserialize(payload)
}

/// Decode the message's payload into a fresh `T` and dispatch it to
/// `handler` together with the message's context.
///
/// Every call settles the message with exactly one terminal signal:
///
/// - decode failure → ack, returns [`HandleError::Decode`]
/// - handler error → nack (redelivery requested), returns `Ok(())`
/// - handler success → ack, returns `Ok(())`
///
/// The decode target is bound by `DeserializeOwned` and allocated fresh per
/// invocation, never reused across messages.
///
/// ## Example
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct AppointmentBooked { id: String, patient_id: String }
///
/// while let Some(msg) = messages.recv().await {
///     let result = handle_message(&msg, |ctx, booked: AppointmentBooked| async move {
///         process(ctx, booked).await // errors here trigger redelivery
///     })
///     .await;
///     if let Err(err) = result {
///         tracing::error!(uuid = %msg.uuid(), error = %err, "dropped undecodable message");
///     }
/// }
/// ```
pub async fn handle_message<T, F, Fut, E>(msg: &Message, handler: F) -> Result<(), HandleError>
where
    T: DeserializeOwned,
    F: FnOnce(MessageContext, T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let target: T = match decode_payload(msg.payload()) {
        Ok(target) => target,
        Err(err) => {
            msg.ack();
            return Err(HandleError::Decode(err.to_string()));
        }
    };

    if handler(msg.context(), target).await.is_err() {
        // The handler logs its own failure; we only request redelivery.
        msg.nack();
        return Ok(());
    }

    msg.ack();
    Ok(())
}
