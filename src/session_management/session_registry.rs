use super::idle_watcher::spawn_idle_watcher;
use super::session::{Session, SessionInfo, SessionSettings};
use crate::device_control::{Credentials, DeviceAddress, DeviceConnector};
use crate::error_handling::types::{DeviceError, SessionError};
use crate::media_ingest::MediaBackend;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

/// Process-wide table of live sessions.
///
/// Sessions are only ever removed by [`SessionRegistry::sweep`]; everything else marks them
/// terminated and lets the sweep reap them.
///
/// # Fields Overview
///
/// - `sessions`: live and not-yet-reaped sessions by identifier
/// - `connector`: opens device control connections for new sessions
/// - `media`: transport and decoder handed to every ingest run
/// - `settings`: timing parameters of new sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    connector: Arc<dyn DeviceConnector>,
    media: MediaBackend,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn DeviceConnector>,
        media: MediaBackend,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
            media,
            settings,
        }
    }

    fn live_for<'a>(
        sessions: &'a HashMap<Uuid, Arc<Session>>,
        address: &DeviceAddress,
    ) -> Option<&'a Arc<Session>> {
        sessions
            .values()
            .find(|s| !s.is_terminated() && s.address() == address)
    }

    /// Returns the live session controlling `address`, creating one if there is none.
    ///
    /// The boolean is `true` when a new session was created. Creation connects to the
    /// device and resolves its first profile before anything is inserted, so a failure
    /// leaves no trace.
    pub async fn find_or_create(
        &self,
        address: DeviceAddress,
        credentials: Credentials,
    ) -> Result<(Arc<Session>, bool), SessionError> {
        if let Some(session) = Self::live_for(&*self.sessions.read().await, &address).cloned() {
            debug!("[{}] Reusing session for {}", session.id(), address);
            session.touch();
            return Ok((session, false));
        }

        let device = self
            .connector
            .connect(&address, &credentials)
            .await
            .map_err(SessionError::DeviceUnreachable)?;
        let profile = device.list_profiles().into_iter().next().ok_or_else(|| {
            SessionError::DeviceUnreachable(DeviceError::MalformedResponse(String::from(
                "device reports no media profile",
            )))
        })?;
        let session = Arc::new(Session::new(
            address.clone(),
            credentials,
            device,
            profile.clone(),
            self.media.clone(),
            self.settings.clone(),
        ));
        let uri = session
            .stream_uri(&profile)
            .await
            .map_err(SessionError::DeviceUnreachable)?;

        let mut sessions = self.sessions.write().await;
        // another request may have connected the same device meanwhile
        if let Some(existing) = Self::live_for(&sessions, &address).cloned() {
            debug!("[{}] Lost creation race for {}", existing.id(), address);
            existing.touch();
            return Ok((existing, false));
        }
        sessions.insert(session.id(), session.clone());
        session.launch_ingest(uri);
        spawn_idle_watcher(&session);
        info!(
            "[{}] Session created for {} on profile {}",
            session.id(),
            address,
            profile
        );
        Ok((session, true))
    }

    /// Looks up a live session. Terminated sessions awaiting the sweep are not found.
    pub async fn get(&self, id: &Uuid) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .filter(|s| !s.is_terminated())
            .cloned()
            .ok_or(SessionError::NotFound)
    }

    /// Removes every terminated session and returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, s)| s.is_terminated())
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                session.release();
                info!("[{}] Session removed", id);
            }
        }
        expired.len()
    }

    /// Number of sessions in the table, terminated ones included until swept.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.is_terminated())
            .map(|s| s.info())
            .collect()
    }

    /// Closes and removes every session.
    pub async fn shutdown_all(&self) -> usize {
        for session in self.sessions.read().await.values() {
            session.close();
        }
        self.sweep().await
    }

    /// Runs [`SessionRegistry::sweep`] every `period` until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let registry = match weak.upgrade() {
                    Some(registry) => registry,
                    None => break,
                };
                let removed = registry.sweep().await;
                if removed > 0 {
                    debug!("Sweep removed {} session(s)", removed);
                }
            }
            debug!("Session sweeper finished");
        })
    }
}
