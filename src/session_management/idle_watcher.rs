use super::session::Session;
use log::{debug, info};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Expires `session` once it has been idle for longer than its idle window.
///
/// The watcher holds only a weak reference, so it never keeps a reaped session alive. It
/// exits after expiring the session, or as soon as the session is gone or terminated.
pub fn spawn_idle_watcher(session: &Arc<Session>) -> JoinHandle<()> {
    let weak = Arc::downgrade(session);
    let id = session.id();
    let window = session.settings().idle_timeout;
    let period = session.settings().idle_check_interval;

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let session = match weak.upgrade() {
                Some(session) => session,
                None => break,
            };
            if session.is_terminated() {
                break;
            }
            let idle = session.idle_for();
            if idle > window {
                info!("[{}] Idle for {:?}, expiring session", id, idle);
                session.expire();
                break;
            }
        }
        debug!("[{}] Idle watcher finished", id);
    })
}
