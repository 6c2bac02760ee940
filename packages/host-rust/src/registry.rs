//! Priority-ranked provider registry.
//!
//! Any number of modules may register an implementation of a capability.
//! Resolution picks the highest [`Priority`]; ties go to the earliest
//! registration, ordered by a monotonically increasing sequence number.
//!
//! Each capability has a slot holding:
//! - an `ArcSwap` snapshot of its ranked registrations, which `resolve`
//!   loads without locking, and
//! - a `parking_lot::Mutex` that serializes writers for that capability only.
//!
//! Writers build a complete new snapshot and publish it with a single store,
//! so readers never see a partially constructed registration.

use std::any::Any;
use std::cmp::Reverse;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use coffer_core::{Capability, Priority, ServiceKey};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Errors returned by [`ServiceRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("'{registrant}' already registered a provider for '{capability}'")]
    DuplicateRegistration {
        capability: &'static str,
        registrant: String,
    },
}

/// Token identifying one registration, used to unregister it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationHandle {
    key: ServiceKey,
    sequence: u64,
}

impl RegistrationHandle {
    #[must_use]
    pub fn capability(&self) -> &'static str {
        self.key.name()
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Descriptive view of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub capability: &'static str,
    pub registrant: Arc<str>,
    pub priority: Priority,
    pub sequence: u64,
}

/// Emitted when the resolved provider of a capability changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderChange {
    pub capability: &'static str,
    pub previous: Option<RegistrationInfo>,
    pub current: Option<RegistrationInfo>,
}

/// The resolved provider of a capability together with its registration.
pub struct ActiveProvider<T: ?Sized> {
    implementation: Arc<T>,
    info: RegistrationInfo,
    key: ServiceKey,
}

impl<T: ?Sized> ActiveProvider<T> {
    #[must_use]
    pub fn info(&self) -> &RegistrationInfo {
        &self.info
    }

    #[must_use]
    pub fn registrant(&self) -> &str {
        &self.info.registrant
    }

    /// Handle of the registration this provider was resolved from.
    #[must_use]
    pub fn handle(&self) -> RegistrationHandle {
        RegistrationHandle {
            key: self.key,
            sequence: self.info.sequence,
        }
    }

    #[must_use]
    pub fn implementation(&self) -> &Arc<T> {
        &self.implementation
    }
}

impl<T: ?Sized> Clone for ActiveProvider<T> {
    fn clone(&self) -> Self {
        Self {
            implementation: Arc::clone(&self.implementation),
            info: self.info.clone(),
            key: self.key,
        }
    }
}

impl<T: ?Sized> Deref for ActiveProvider<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.implementation
    }
}

impl<T: ?Sized> fmt::Debug for ActiveProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveProvider")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Internal slot
// ---------------------------------------------------------------------------

struct Registration {
    info: RegistrationInfo,
    /// Holds an `Arc<T>` for the slot's contract type `T`.
    implementation: Arc<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Slot {
    /// Ranked best-first. Replaced wholesale on every write.
    ranked: ArcSwap<Vec<Arc<Registration>>>,
    writer: Mutex<Vec<mpsc::UnboundedSender<ProviderChange>>>,
}

impl Slot {
    /// Applies `edit` to a copy of the ranked list, publishes the result, and
    /// notifies subscribers if the winner changed. Runs under the writer lock.
    fn mutate<R>(&self, edit: impl FnOnce(&mut Vec<Arc<Registration>>) -> R) -> R {
        let mut subscribers = self.writer.lock();

        let current = self.ranked.load_full();
        let mut next: Vec<Arc<Registration>> = (*current).clone();
        let result = edit(&mut next);
        next.sort_by_key(|r| (Reverse(r.info.priority), r.info.sequence));

        let previous = current.first().map(|r| r.info.clone());
        let winner = next.first().map(|r| r.info.clone());
        self.ranked.store(Arc::new(next));

        let changed = previous.as_ref().map(|i| i.sequence) != winner.as_ref().map(|i| i.sequence);
        if changed {
            let capability = previous
                .as_ref()
                .or(winner.as_ref())
                .map_or("", |i| i.capability);
            let change = ProviderChange {
                capability,
                previous,
                current: winner,
            };
            subscribers.retain(|tx| tx.send(change.clone()).is_ok());
        }

        result
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Registry mapping capabilities to ranked provider registrations.
///
/// Constructed once by the host and shared as `Arc<ServiceRegistry>`.
pub struct ServiceRegistry {
    slots: DashMap<ServiceKey, Arc<Slot>>,
    next_sequence: AtomicU64,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_sequence: AtomicU64::new(1),
        }
    }

    fn slot(&self, key: ServiceKey) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(&key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(key).or_default().value())
    }

    fn existing_slot(&self, key: &ServiceKey) -> Option<Arc<Slot>> {
        self.slots.get(key).map(|slot| Arc::clone(slot.value()))
    }

    /// Registers `implementation` for `capability`.
    ///
    /// Coexists with any other registrations; only resolution picks a winner.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateRegistration`] if `registrant`
    /// already has a live registration for this capability.
    pub fn register<T>(
        &self,
        capability: Capability<T>,
        implementation: Arc<T>,
        priority: Priority,
        registrant: &str,
    ) -> Result<RegistrationHandle, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = capability.key();
        let slot = self.slot(key);

        let outcome = slot.mutate(|ranked| {
            if ranked.iter().any(|r| &*r.info.registrant == registrant) {
                return Err(RegistryError::DuplicateRegistration {
                    capability: key.name(),
                    registrant: registrant.to_string(),
                });
            }
            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            let erased: Arc<dyn Any + Send + Sync> = Arc::new(implementation);
            ranked.push(Arc::new(Registration {
                info: RegistrationInfo {
                    capability: key.name(),
                    registrant: Arc::from(registrant),
                    priority,
                    sequence,
                },
                implementation: erased,
            }));
            Ok(RegistrationHandle { key, sequence })
        });

        match &outcome {
            Ok(handle) => tracing::debug!(
                capability = key.name(),
                registrant,
                %priority,
                sequence = handle.sequence,
                "provider registered"
            ),
            Err(error) => tracing::error!(%error, "rejected provider registration"),
        }
        outcome
    }

    /// Removes a registration. Returns `false` (and does nothing) if it was
    /// already removed.
    pub fn unregister(&self, handle: &RegistrationHandle) -> bool {
        let Some(slot) = self.existing_slot(&handle.key) else {
            return false;
        };
        let removed = slot.mutate(|ranked| {
            let before = ranked.len();
            ranked.retain(|r| r.info.sequence != handle.sequence);
            ranked.len() != before
        });
        if removed {
            tracing::debug!(
                capability = handle.key.name(),
                sequence = handle.sequence,
                "provider unregistered"
            );
        }
        removed
    }

    /// Removes every registration owned by `registrant` across all
    /// capabilities. Returns how many were removed.
    pub fn unregister_all(&self, registrant: &str) -> usize {
        let slots: Vec<Arc<Slot>> = self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        let removed: usize = slots
            .iter()
            .map(|slot| {
                slot.mutate(|ranked| {
                    let before = ranked.len();
                    ranked.retain(|r| &*r.info.registrant != registrant);
                    before - ranked.len()
                })
            })
            .sum();
        if removed > 0 {
            tracing::debug!(registrant, removed, "registrant unregistered");
        }
        removed
    }

    /// Returns the current provider for `capability`, if any.
    pub fn resolve<T>(&self, capability: Capability<T>) -> Option<ActiveProvider<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = capability.key();
        let slot = self.existing_slot(&key)?;
        let ranked = slot.ranked.load();
        let winner = ranked.first()?;
        match winner.implementation.downcast_ref::<Arc<T>>() {
            Some(implementation) => Some(ActiveProvider {
                implementation: Arc::clone(implementation),
                info: winner.info.clone(),
                key,
            }),
            None => {
                tracing::error!(
                    capability = key.name(),
                    "registration holds an implementation of the wrong type"
                );
                None
            }
        }
    }

    /// Returns whether `handle` is still the resolved winner of its capability.
    #[must_use]
    pub fn is_current(&self, handle: &RegistrationHandle) -> bool {
        self.existing_slot(&handle.key)
            .and_then(|slot| slot.ranked.load().first().map(|r| r.info.sequence))
            == Some(handle.sequence)
    }

    /// Live registrations for `capability`, best first.
    pub fn registrations<T>(&self, capability: Capability<T>) -> Vec<RegistrationInfo>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.existing_slot(&capability.key())
            .map(|slot| slot.ranked.load().iter().map(|r| r.info.clone()).collect())
            .unwrap_or_default()
    }

    /// Resolves the live registration of `capability` owned by `registrant`,
    /// whether or not it is the current winner.
    pub fn resolve_registrant<T>(
        &self,
        capability: Capability<T>,
        registrant: &str,
    ) -> Option<ActiveProvider<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = capability.key();
        let slot = self.existing_slot(&key)?;
        let ranked = slot.ranked.load();
        let found = ranked.iter().find(|r| &*r.info.registrant == registrant)?;
        let implementation = found.implementation.downcast_ref::<Arc<T>>()?;
        Some(ActiveProvider {
            implementation: Arc::clone(implementation),
            info: found.info.clone(),
            key,
        })
    }

    /// Subscribes to winner changes for `capability`.
    ///
    /// Exactly one [`ProviderChange`] is sent per change of winner, in the
    /// order the changes were applied. Dropping the receiver unsubscribes.
    pub fn subscribe<T>(&self, capability: Capability<T>) -> mpsc::UnboundedReceiver<ProviderChange>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        self.slot(capability.key()).writer.lock().push(tx);
        rx
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
