// SPDX-License-Identifier: GPL-3.0-or-later

use drover_domain::DomainError;
use drover_infrastructure::BackendError;
use thiserror::Error;

/// Errors surfaced to producers enqueueing work.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid job: {0}")]
    Invalid(#[from] DomainError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("queue {queue_id} is processed by cron and needs a positive time budget")]
    UnboundedCronRun { queue_id: String },
}
