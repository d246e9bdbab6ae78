//! Two-phase registration.
//!
//! Entities are usually registered before the host has loaded the module,
//! when no environment exists yet. A [`Manager`] queues them and defines the
//! whole queue once, when the module is initialized. After that the queue is
//! closed and entities must be registered with a live environment through
//! [`Manager::register_and_define`].

use std::collections::HashSet;
use std::fmt;

use log::debug;
use parking_lot::Mutex;

use crate::codec::Name;
use crate::error::{RegistrationError, Result};
use crate::host::Env;

/// An entity that can be defined in a live environment.
pub trait Define: Send + 'static {
    fn define(&self, env: &mut Env<'_>) -> Result<()>;
}

/// Flags controlling a [`Manager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerFlags(pub u8);

impl ManagerFlags {
    pub const NONE: ManagerFlags = ManagerFlags(0);
    /// Every entity must be named.
    pub const REQUIRE_NAME: ManagerFlags = ManagerFlags(0b001);
    /// Named entities must have distinct names.
    pub const REQUIRE_UNIQUE_NAME: ManagerFlags = ManagerFlags(0b010);
    /// The queue is defined when the owning module is initialized.
    pub const DEFINE_ON_INIT: ManagerFlags = ManagerFlags(0b100);

    pub fn contains(&self, other: ManagerFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ManagerFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        ManagerFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ManagerFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

struct Queued<T> {
    name: Option<Name>,
    item: T,
}

struct State<T> {
    queue: Vec<Queued<T>>,
    names: HashSet<Name>,
    closed: bool,
}

/// Queue of entities awaiting definition.
///
/// All methods are safe to call from several threads at once.
pub struct Manager<T> {
    flags: ManagerFlags,
    state: Mutex<State<T>>,
}

impl<T: Define> Manager<T> {
    pub fn new(flags: ManagerFlags) -> Self {
        Self {
            flags,
            state: Mutex::new(State {
                queue: Vec::new(),
                names: HashSet::new(),
                closed: false,
            }),
        }
    }

    pub fn flags(&self) -> ManagerFlags {
        self.flags
    }

    /// Queue `item` for definition by [`define_queued`](Self::define_queued).
    ///
    /// Fails once the queue has been defined, if a required name is missing,
    /// or if the name is already taken.
    pub fn enqueue(&self, name: Option<Name>, item: T) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RegistrationError::Closed.into());
        }
        self.claim(&mut state, name.as_ref())?;
        state.queue.push(Queued { name, item });
        Ok(())
    }

    /// Validate `item` like [`enqueue`](Self::enqueue) would, then define it
    /// immediately. Works whether or not the queue is closed.
    pub fn register_and_define(&self, env: &mut Env<'_>, name: Option<Name>, item: T) -> Result<()> {
        self.reserve(name.as_ref())?;
        if let Some(name) = &name {
            debug!("defining {}", name);
        }
        item.define(env)
    }

    /// Validate and claim `name` for an entity the caller defines itself.
    pub fn reserve(&self, name: Option<&Name>) -> Result<()> {
        let mut state = self.state.lock();
        self.claim(&mut state, name)
    }

    /// Define every queued item in registration order and close the queue.
    ///
    /// Stops at the first failure; items defined before it stay defined and
    /// the rest are dropped.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn define_queued(&self, env: &mut Env<'_>) -> Result<()> {
        for queued in self.drain() {
            if let Some(name) = &queued.name {
                debug!("defining {}", name);
            }
            queued.item.define(env)?;
        }
        Ok(())
    }

    /// Whether the queue has been defined.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of items still waiting in the queue.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether an entity named `name` has been registered.
    pub fn has_name(&self, name: &str) -> bool {
        self.state.lock().names.contains(name)
    }

    fn claim(&self, state: &mut State<T>, name: Option<&Name>) -> Result<()> {
        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ if self.flags.contains(ManagerFlags::REQUIRE_NAME) => {
                return Err(RegistrationError::EmptyName.into());
            }
            _ => return Ok(()),
        };
        name.validate()?;
        if self.flags.contains(ManagerFlags::REQUIRE_UNIQUE_NAME) {
            if state.names.contains(name) {
                return Err(RegistrationError::DuplicateName(name.to_string()).into());
            }
            state.names.insert(name.clone());
        }
        Ok(())
    }

    // Items are moved out under the lock so that definitions can register
    // further entities without deadlocking.
    fn drain(&self) -> Vec<Queued<T>> {
        let mut state = self.state.lock();
        if state.closed {
            panic!("{}", RegistrationError::Closed);
        }
        state.closed = true;
        std::mem::take(&mut state.queue)
    }
}

impl<T> fmt::Debug for Manager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Manager")
            .field("flags", &self.flags)
            .field("queued", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::host::sandbox::Sandbox;
    use std::sync::Arc;

    struct Record {
        log: Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
        fail: bool,
    }

    impl Define for Record {
        fn define(&self, _env: &mut Env<'_>) -> Result<()> {
            if self.fail {
                return Err(Error::other(format!("{} failed", self.label)));
            }
            self.log.lock().push(self.label);
            Ok(())
        }
    }

    fn record(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Record {
        Record {
            log: Arc::clone(log),
            label,
            fail: false,
        }
    }

    fn unique() -> Manager<Record> {
        Manager::new(ManagerFlags::REQUIRE_NAME | ManagerFlags::REQUIRE_UNIQUE_NAME)
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = unique();
        manager.enqueue(Some(Name::new("x")), record(&log, "a")).unwrap();
        let err = manager
            .enqueue(Some(Name::new("x")), record(&log, "b"))
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate name x");
        assert_eq!(manager.pending(), 1);

        let mut sandbox = Sandbox::new();
        sandbox.with_env(|env| manager.define_queued(env)).unwrap();
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[test]
    fn test_name_requirements() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = unique();
        let err = manager.enqueue(None, record(&log, "a")).unwrap_err();
        assert_eq!(err.to_string(), "unnamed queue item");
        let err = manager
            .enqueue(Some(Name::new("")), record(&log, "a"))
            .unwrap_err();
        assert_eq!(err.to_string(), "unnamed queue item");

        let anonymous: Manager<Record> = Manager::new(ManagerFlags::REQUIRE_UNIQUE_NAME);
        anonymous.enqueue(None, record(&log, "a")).unwrap();
        anonymous.enqueue(None, record(&log, "b")).unwrap();
        assert_eq!(anonymous.pending(), 2);
    }

    #[test]
    fn test_closed_after_define() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = unique();
        manager.enqueue(Some(Name::new("a")), record(&log, "a")).unwrap();
        let mut sandbox = Sandbox::new();
        sandbox.with_env(|env| manager.define_queued(env)).unwrap();
        assert!(manager.is_closed());

        let err = manager
            .enqueue(Some(Name::new("b")), record(&log, "b"))
            .unwrap_err();
        assert_eq!(err.to_string(), "initialization already complete");

        sandbox
            .with_env(|env| manager.register_and_define(env, Some(Name::new("c")), record(&log, "c")))
            .unwrap();
        assert_eq!(*log.lock(), vec!["a", "c"]);
    }

    #[test]
    fn test_failure_stops_definition() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = unique();
        manager.enqueue(Some(Name::new("a")), record(&log, "a")).unwrap();
        let failing = Record {
            fail: true,
            ..record(&log, "b")
        };
        manager.enqueue(Some(Name::new("b")), failing).unwrap();
        manager.enqueue(Some(Name::new("c")), record(&log, "c")).unwrap();

        let mut sandbox = Sandbox::new();
        let err = sandbox.with_env(|env| manager.define_queued(env)).unwrap_err();
        assert_eq!(err.to_string(), "b failed");
        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(manager.pending(), 0);
    }

    #[test]
    #[should_panic(expected = "initialization already complete")]
    fn test_second_define_panics() {
        let manager = unique();
        let mut sandbox = Sandbox::new();
        let _ = sandbox.with_env(|env| manager.define_queued(env));
        let _ = sandbox.with_env(|env| manager.define_queued(env));
    }
}
