use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt as _;
use rand::{SeedableRng as _, rngs::StdRng};
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use super::Shared;
use crate::{
    auth::{self, AuthOutcome},
    prelude::*,
    stats::UserStart,
};


/// Lifecycle of one simulated user: log in once, then perform randomly picked
/// actions until `cancel` is triggered. Cancellation is only observed between
/// actions and while pausing, never in the middle of a request.
pub(super) async fn run(id: u32, shared: Arc<Shared>, cancel: CancellationToken) {
    let span = tracing::info_span!("user", id);
    lifecycle(shared, cancel).instrument(span).await
}

async fn lifecycle(shared: Arc<Shared>, cancel: CancellationToken) {
    let ctx = match auth::authenticate(&shared.client, &shared.config.auth).await {
        AuthOutcome::Authenticated(credential) => {
            shared.stats.record_user_start(UserStart::Authenticated);
            shared.base_context.with_credential(&credential)
        }
        AuthOutcome::Unauthenticated(reason) if shared.config.auth.require_token => {
            warn!("stopping user: no token ({reason}) and `auth.require_token` is set");
            shared.stats.record_user_start(UserStart::Stopped);
            return;
        }
        AuthOutcome::Unauthenticated(reason) => {
            warn!("continuing without token ({reason}), requests are sent unauthenticated");
            shared.stats.record_user_start(UserStart::Unauthenticated);
            shared.base_context.clone()
        }
    };

    debug!(authenticated = ctx.is_authenticated(), "starting actions");
    let mut rng = StdRng::from_entropy();
    let timeout = shared.config.target.request_timeout;
    while !cancel.is_cancelled() {
        let action = shared.dispatcher.next_action(&mut rng);
        let fut = action.perform(&shared.client, &ctx, &shared.order, timeout);

        // A panicking action must not take the whole user down with it. It is
        // counted as an error and the user carries on with its next action.
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(report) => shared.stats.record(&report),
            Err(panic) => {
                let msg = panic.downcast_ref::<String>()
                    .map(|s| s.as_str())
                    .or(panic.downcast_ref::<&str>().copied())
                    .unwrap_or("<no message>");
                error!("action {action} panicked: '{msg}'");
                shared.stats.record_error(action, msg);
            }
        }

        let wait = shared.dispatcher.wait_time(&mut rng);
        trace!(?wait, "pausing");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    debug!("user stopped");
}
