// SPDX-License-Identifier: GPL-3.0-only

//! Camera access authorization
//!
//! Two gates are provided. Outside a sandbox, access is decided by the
//! permissions on the `/dev/video*` nodes and can't be changed from here, so
//! [`DeviceNodeGate`] never reports `Undetermined`. Inside Flatpak,
//! [`PortalGate`] asks xdg-desktop-portal, which may show a prompt.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

const FLATPAK_INFO: &str = "/.flatpak-info";
const PORTAL_DESTINATION: &str = "org.freedesktop.portal.Desktop";
const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";
const CAMERA_INTERFACE: &str = "org.freedesktop.portal.Camera";
const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";

/// Whether the process may use the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    /// Not asked yet; a request may prompt the user
    Undetermined,
    /// Blocked by policy the user cannot change from here
    Restricted,
    /// The user (or the device node permissions) refused access
    Denied,
    Authorized,
}

impl std::fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuthorizationState::Undetermined => "undetermined",
            AuthorizationState::Restricted => "restricted",
            AuthorizationState::Denied => "denied",
            AuthorizationState::Authorized => "authorized",
        };
        f.write_str(name)
    }
}

/// Completion of an authorization request, called exactly once on an
/// unspecified thread
pub type AuthorizationCallback = Box<dyn FnOnce(AuthorizationState) + Send>;

/// Source of truth for camera access
pub trait PermissionGate: Send + Sync {
    /// Current state, without prompting; must not block
    fn query_authorization(&self) -> AuthorizationState;

    /// Ask for access; only meaningful while `Undetermined`
    fn request_authorization(&self, completion: AuthorizationCallback);
}

/// Pick the gate that matches how the process runs
pub fn default_gate() -> Arc<dyn PermissionGate> {
    if Path::new(FLATPAK_INFO).exists() {
        info!("Sandboxed, using camera portal");
        Arc::new(PortalGate::new())
    } else {
        Arc::new(DeviceNodeGate::new())
    }
}

/// A gate with a fixed answer, for sources that don't touch a camera
#[derive(Debug, Clone, Copy)]
pub struct FixedGate(pub AuthorizationState);

impl PermissionGate for FixedGate {
    fn query_authorization(&self) -> AuthorizationState {
        self.0
    }

    fn request_authorization(&self, completion: AuthorizationCallback) {
        completion(self.0);
    }
}

/// Authorization from filesystem permissions on video device nodes
#[derive(Debug, Clone)]
pub struct DeviceNodeGate {
    dev_dir: PathBuf,
}

impl Default for DeviceNodeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceNodeGate {
    pub fn new() -> Self {
        Self::with_dev_dir("/dev")
    }

    /// Look for `video*` nodes in another directory
    pub fn with_dev_dir(dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }

    fn video_nodes(&self) -> Vec<PathBuf> {
        let mut nodes: Vec<PathBuf> = std::fs::read_dir(&self.dev_dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("video"))
            })
            .collect();
        nodes.sort();
        nodes
    }
}

impl PermissionGate for DeviceNodeGate {
    fn query_authorization(&self) -> AuthorizationState {
        let nodes = self.video_nodes();
        // No nodes means nothing to refuse; configuration reports the
        // missing device instead
        if nodes.is_empty() {
            return AuthorizationState::Authorized;
        }

        let mut state = AuthorizationState::Denied;
        for node in &nodes {
            match node_access(node) {
                AuthorizationState::Authorized => return AuthorizationState::Authorized,
                AuthorizationState::Restricted => state = AuthorizationState::Restricted,
                _ => {}
            }
        }
        debug!(nodes = nodes.len(), %state, "No accessible video node");
        state
    }

    fn request_authorization(&self, completion: AuthorizationCallback) {
        let gate = self.clone();
        answer_on_thread(spawn_named, "scanner-auth", completion, move || {
            gate.query_authorization()
        });
    }
}

/// Read/write access to one device node
fn node_access(path: &Path) -> AuthorizationState {
    let Ok(c_path) = CString::new(path.as_os_str().as_encoded_bytes()) else {
        return AuthorizationState::Denied;
    };
    let result = unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) };
    if result == 0 {
        return AuthorizationState::Authorized;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::EPERM) => AuthorizationState::Restricted,
        _ => AuthorizationState::Denied,
    }
}

/// Authorization through the xdg-desktop-portal Camera interface
#[derive(Debug, Clone)]
pub struct PortalGate {
    state: Arc<Mutex<AuthorizationState>>,
}

impl Default for PortalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalGate {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AuthorizationState::Undetermined)),
        }
    }

    fn set_state(&self, state: AuthorizationState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl PermissionGate for PortalGate {
    fn query_authorization(&self) -> AuthorizationState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_authorization(&self, completion: AuthorizationCallback) {
        let gate = self.clone();
        answer_on_thread(spawn_named, "scanner-portal", completion, move || {
            let state = match access_camera() {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "Camera portal unavailable");
                    AuthorizationState::Restricted
                }
            };
            info!(%state, "Camera portal answered");
            gate.set_state(state);
            state
        });
    }
}

type Spawner = fn(&str, Box<dyn FnOnce() + Send>) -> std::io::Result<()>;

fn spawn_named(name: &str, task: Box<dyn FnOnce() + Send>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name(name.into())
        .spawn(task)
        .map(drop)
}

/// Compute the answer on its own thread and hand it to `completion`
///
/// The completion runs exactly once: if no thread can be started the request
/// is answered `Restricted` on the caller's thread.
fn answer_on_thread<F>(spawn: Spawner, name: &str, completion: AuthorizationCallback, answer: F)
where
    F: FnOnce() -> AuthorizationState + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(completion)));
    let take = |slot: &Mutex<Option<AuthorizationCallback>>| {
        slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    };

    let task_slot = Arc::clone(&slot);
    let spawned = spawn(
        name,
        Box::new(move || {
            let state = answer();
            if let Some(completion) = take(&task_slot) {
                completion(state);
            }
        }),
    );
    if let Err(e) = spawned {
        warn!(error = %e, thread = name, "Failed to spawn authorization thread");
        if let Some(completion) = take(&slot) {
            completion(AuthorizationState::Restricted);
        }
    }
}

/// Call `AccessCamera` and wait for the request's `Response` signal
fn access_camera() -> zbus::Result<AuthorizationState> {
    let connection = zbus::blocking::Connection::session()?;
    let token = format!("scanner_{}", uuid::Uuid::new_v4().simple());

    // Subscribe before calling so a fast response is not missed
    let sender = connection
        .unique_name()
        .map(|name| name.trim_start_matches(':').replace('.', "_"))
        .unwrap_or_default();
    let request_path = format!("{}/request/{}/{}", PORTAL_PATH, sender, token);
    let request = zbus::blocking::Proxy::new(
        &connection,
        PORTAL_DESTINATION,
        request_path.as_str(),
        REQUEST_INTERFACE,
    )?;
    let mut responses = request.receive_signal("Response")?;

    let camera = zbus::blocking::Proxy::new(
        &connection,
        PORTAL_DESTINATION,
        PORTAL_PATH,
        CAMERA_INTERFACE,
    )?;
    let mut options: HashMap<&str, zbus::zvariant::Value> = HashMap::new();
    options.insert("handle_token", zbus::zvariant::Value::new(token.as_str()));
    let handle: zbus::zvariant::OwnedObjectPath = camera.call("AccessCamera", &(options,))?;
    debug!(handle = %handle, "Camera access requested");

    let Some(message) = responses.next() else {
        return Ok(AuthorizationState::Denied);
    };
    let (response, _results): (u32, HashMap<String, zbus::zvariant::OwnedValue>) =
        message.body().deserialize()?;
    Ok(portal_response_state(response))
}

/// Portal response codes: 0 granted, 1 cancelled, 2 other
fn portal_response_state(response: u32) -> AuthorizationState {
    match response {
        0 => AuthorizationState::Authorized,
        _ => AuthorizationState::Denied,
    }
}
