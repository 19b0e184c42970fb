//! Concurrent driving of both directions of a bidirectional call.
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{SessionError, TransportError};
use crate::metadata::Metadata;
use crate::session::{SessionReceiver, SessionSender};

/// Counters and trailer of a completed duplex exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplexOutcome {
    pub sent: usize,
    pub received: usize,
    pub trailer: Metadata,
}

/// Send every item of `inputs` and feed every inbound message to `on_frame`,
/// running both directions as independent tasks.
///
/// The sending task half-closes once `inputs` is exhausted. The receiving
/// task runs until the peer's end of stream. The first error reported by
/// either task is returned. A panic in `on_frame` is caught, reported as
/// [`SessionError::CallbackPanic`] and aborts the session so the sending
/// task stops as well.
pub async fn drive<Out, In, I, F>(
    mut sender: SessionSender<Out>,
    mut receiver: SessionReceiver<In>,
    inputs: I,
    mut on_frame: F,
) -> Result<DuplexOutcome, SessionError>
where
    Out: prost::Message + Send + 'static,
    In: prost::Message + Default + Send + 'static,
    I: IntoIterator<Item = Out>,
    I::IntoIter: Send + 'static,
    F: FnMut(In) + Send + 'static,
{
    // One slot per task so neither can block on reporting.
    let (err_tx, mut err_rx) = mpsc::channel::<SessionError>(2);
    let inputs = inputs.into_iter();

    let send_errors = err_tx.clone();
    let send_task = tokio::spawn(async move {
        let report = |sender: &SessionSender<Out>, err: SessionError| {
            // A peer that left early reports why through the receiving task.
            if err != SessionError::Transport(TransportError::Closed) {
                let _ = send_errors.try_send(sender.abort(err));
            }
        };

        let mut sent = 0;
        for msg in inputs {
            if let Err(err) = sender.send(&msg).await {
                report(&sender, err);
                return sent;
            }
            sent += 1;
        }
        if let Err(err) = sender.close_send().await {
            report(&sender, err);
        }
        sent
    });

    let recv_errors = err_tx;
    let recv_task = tokio::spawn(async move {
        let mut received = 0;
        loop {
            match receiver.recv().await {
                Ok(Some(msg)) => {
                    received += 1;
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| on_frame(msg))) {
                        let reason = panic_message(panic.as_ref());
                        warn!(call_id = %receiver.id(), %reason, "Frame callback panicked");
                        let err = receiver.abort(SessionError::CallbackPanic(reason));
                        let _ = recv_errors.try_send(err);
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = recv_errors.try_send(err);
                    break;
                }
            }
        }
        (received, receiver.trailer())
    });

    let sent = send_task.await;
    let received = recv_task.await;

    if let Ok(err) = err_rx.try_recv() {
        debug!(error = %err, "Duplex exchange failed");
        return Err(err);
    }

    let sent = sent.map_err(|err| SessionError::Join(err.to_string()))?;
    let (received, trailer) = received.map_err(|err| SessionError::Join(err.to_string()))?;
    Ok(DuplexOutcome {
        sent,
        received,
        trailer,
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
