//! Service availability queries.

use std::sync::Arc;
use tokio::sync::oneshot;

use crate::adapter::Core;
use crate::error::AdapterError;
use crate::transport::{ServicePermissions, Status, Token};

/// A query waiting for its answer.
#[derive(Debug)]
pub(crate) struct PendingQuery {
    service: String,
    reply: oneshot::Sender<Result<ServicePermissions, AdapterError>>,
}

impl PendingQuery {
    pub(crate) fn fail(self, err: AdapterError) {
        let _ = self.reply.send(Err(err));
    }
}

pub(crate) async fn query(core: &Arc<Core>, service: &str) -> Result<ServicePermissions, AdapterError> {
    if service.is_empty() {
        return Err(AdapterError::InvalidArgument("service name is empty".into()));
    }
    if core.is_stopped() {
        return Err(AdapterError::Shutdown);
    }

    let (tx, rx) = oneshot::channel();
    let token = core.queries.register(PendingQuery {
        service: service.to_string(),
        reply: tx,
    });
    if core.is_stopped() {
        core.queries.discard(token);
        return Err(AdapterError::Shutdown);
    }

    core.provider.service_available(service, token);
    rx.await.unwrap_or(Err(AdapterError::Shutdown))
}

pub(crate) fn complete(
    core: &Core,
    token: Token,
    result: Result<ServicePermissions, Status>,
) -> Result<(), AdapterError> {
    let pending = core.queries.unregister(token)?;
    let answer = match result {
        Ok(permissions) => {
            tracing::debug!(
                service = %pending.service,
                dial = permissions.can_dial(),
                bind = permissions.can_bind(),
                "Service available"
            );
            Ok(permissions)
        }
        Err(status) => {
            tracing::debug!(service = %pending.service, status = %status, "Service unavailable");
            Err(AdapterError::transport("service_available", status))
        }
    };
    let _ = pending.reply.send(answer);
    Ok(())
}
