//! Test doubles for wcsc-lib.
//!
//! [`FakeProvider`] stands in for the system certificate store provider and
//! [`FakeInterceptor`] for the interception primitive. Both record every call
//! so tests can assert on ordering, and both support failure injection.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::intercept::{HookPoint, InterceptError, Interceptor};
use crate::provider::{ProviderError, StoreHandle, StoreItem, StoreProvider, StoreScope};

/// `ERROR_INVALID_HANDLE`
const INVALID_HANDLE: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
  OpenSystem(StoreScope, String, StoreHandle),
  OpenCollection(StoreHandle),
  AddToCollection(StoreHandle, StoreHandle),
  Close(StoreHandle),
}

#[derive(Debug, Clone)]
enum FakeStore {
  Scoped { scope: StoreScope, name: String },
  Collection { members: Vec<StoreHandle> },
  Foreign,
}

#[derive(Debug, Default)]
struct ProviderState {
  next_handle: usize,
  stores: HashMap<StoreHandle, FakeStore>,
  open: HashSet<StoreHandle>,
  calls: Vec<ProviderCall>,
  closed: Vec<StoreHandle>,
  collections: Vec<StoreHandle>,
  items: HashMap<(StoreScope, String), Vec<String>>,
  fail_open: HashMap<(StoreScope, String), u32>,
  fail_collection: Option<u32>,
  fail_add: HashMap<StoreHandle, u32>,
  fail_close: HashSet<StoreHandle>,
}

impl ProviderState {
  fn allocate(&mut self, store: FakeStore) -> StoreHandle {
    self.next_handle += 0x10;
    let handle = StoreHandle::from_raw(0x1000 + self.next_handle);
    self.stores.insert(handle, store);
    self.open.insert(handle);
    handle
  }

  fn list(&self, handle: StoreHandle) -> Result<Vec<StoreItem>, ProviderError> {
    if !self.open.contains(&handle) {
      return Err(ProviderError::new(INVALID_HANDLE));
    }
    match self.stores.get(&handle) {
      Some(FakeStore::Scoped { scope, name }) => Ok(
        self
          .items
          .get(&(*scope, name.clone()))
          .into_iter()
          .flatten()
          .map(|subject| StoreItem {
            subject: format!("{}@{}", subject, scope),
          })
          .collect(),
      ),
      Some(FakeStore::Collection { members }) => {
        let mut items = Vec::new();
        for member in members {
          items.extend(self.list(*member)?);
        }
        Ok(items)
      }
      Some(FakeStore::Foreign) => Ok(Vec::new()),
      None => Err(ProviderError::new(INVALID_HANDLE)),
    }
  }
}

/// In-memory certificate store provider.
///
/// Closing a handle that is unknown or already closed fails, so double
/// releases show up in test assertions.
#[derive(Debug, Default)]
pub struct FakeProvider {
  state: Mutex<ProviderState>,
}

impl FakeProvider {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, ProviderState> {
    self.state.lock().unwrap()
  }

  pub fn calls(&self) -> Vec<ProviderCall> {
    self.lock().calls.clone()
  }

  /// Handles successfully closed, in order.
  pub fn closed(&self) -> Vec<StoreHandle> {
    self.lock().closed.clone()
  }

  /// Handles still open, sorted.
  pub fn open_handles(&self) -> Vec<StoreHandle> {
    let mut open: Vec<_> = self.lock().open.iter().copied().collect();
    open.sort();
    open
  }

  /// Every collection store ever created.
  pub fn collections(&self) -> Vec<StoreHandle> {
    self.lock().collections.clone()
  }

  /// Open a store the way application code would, outside the engine.
  pub fn open_foreign(&self, _name: &str) -> StoreHandle {
    self.lock().allocate(FakeStore::Foreign)
  }

  pub fn set_items(&self, scope: StoreScope, name: &str, subjects: &[&str]) {
    self.lock().items.insert(
      (scope, name.to_string()),
      subjects.iter().map(|s| s.to_string()).collect(),
    );
  }

  pub fn fail_open(&self, scope: StoreScope, name: &str, code: u32) {
    self.lock().fail_open.insert((scope, name.to_string()), code);
  }

  pub fn fail_collection(&self, code: u32) {
    self.lock().fail_collection = Some(code);
  }

  pub fn fail_add(&self, member: StoreHandle, code: u32) {
    self.lock().fail_add.insert(member, code);
  }

  pub fn fail_close(&self, handle: StoreHandle) {
    self.lock().fail_close.insert(handle);
  }
}

impl StoreProvider for FakeProvider {
  fn open_system(&self, scope: StoreScope, name: &str) -> Result<StoreHandle, ProviderError> {
    let mut state = self.lock();
    if let Some(&code) = state.fail_open.get(&(scope, name.to_string())) {
      return Err(ProviderError::new(code));
    }
    let handle = state.allocate(FakeStore::Scoped {
      scope,
      name: name.to_string(),
    });
    state.calls.push(ProviderCall::OpenSystem(scope, name.to_string(), handle));
    Ok(handle)
  }

  fn open_collection(&self) -> Result<StoreHandle, ProviderError> {
    let mut state = self.lock();
    if let Some(code) = state.fail_collection {
      return Err(ProviderError::new(code));
    }
    let handle = state.allocate(FakeStore::Collection { members: Vec::new() });
    state.collections.push(handle);
    state.calls.push(ProviderCall::OpenCollection(handle));
    Ok(handle)
  }

  fn add_to_collection(&self, collection: StoreHandle, member: StoreHandle, _priority: u32) -> Result<(), ProviderError> {
    let mut state = self.lock();
    state.calls.push(ProviderCall::AddToCollection(collection, member));
    if let Some(&code) = state.fail_add.get(&member) {
      return Err(ProviderError::new(code));
    }
    match state.stores.get_mut(&collection) {
      Some(FakeStore::Collection { members }) => {
        members.push(member);
        Ok(())
      }
      _ => Err(ProviderError::new(INVALID_HANDLE)),
    }
  }

  fn close(&self, store: StoreHandle, _flags: u32) -> bool {
    let mut state = self.lock();
    state.calls.push(ProviderCall::Close(store));
    if state.fail_close.contains(&store) || !state.open.remove(&store) {
      return false;
    }
    state.closed.push(store);
    true
  }

  fn items(&self, store: StoreHandle) -> Result<Vec<StoreItem>, ProviderError> {
    self.lock().list(store)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptCall {
  RestoreAfterWith,
  Begin,
  UpdateThread,
  Attach(HookPoint),
  Detach(HookPoint),
  Commit,
  Abort,
}

#[derive(Debug, Default)]
struct InterceptState {
  calls: Vec<InterceptCall>,
  in_transaction: bool,
  pending: Vec<(bool, HookPoint)>,
  installed: Vec<HookPoint>,
  helper_process: bool,
  unsupported: HashSet<HookPoint>,
  fail_attach: HashSet<HookPoint>,
  fail_commit: Option<u32>,
}

impl InterceptState {
  fn require_transaction(&self) -> Result<(), InterceptError> {
    if self.in_transaction {
      Ok(())
    } else {
      Err(InterceptError::NoTransaction)
    }
  }
}

/// Interception primitive that only tracks which hooks would be installed.
#[derive(Debug, Default)]
pub struct FakeInterceptor {
  state: Mutex<InterceptState>,
}

impl FakeInterceptor {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, InterceptState> {
    self.state.lock().unwrap()
  }

  pub fn calls(&self) -> Vec<InterceptCall> {
    self.lock().calls.clone()
  }

  pub fn installed(&self) -> Vec<HookPoint> {
    self.lock().installed.clone()
  }

  pub fn set_helper_process(&self, helper: bool) {
    self.lock().helper_process = helper;
  }

  pub fn unsupported(&self, point: HookPoint) {
    self.lock().unsupported.insert(point);
  }

  pub fn fail_attach(&self, point: HookPoint) {
    self.lock().fail_attach.insert(point);
  }

  pub fn fail_commit(&self, code: u32) {
    self.lock().fail_commit = Some(code);
  }
}

impl Interceptor for FakeInterceptor {
  fn is_helper_process(&self) -> bool {
    self.lock().helper_process
  }

  fn restore_after_with(&self) {
    self.lock().calls.push(InterceptCall::RestoreAfterWith);
  }

  fn supports(&self, point: HookPoint) -> bool {
    !self.lock().unsupported.contains(&point)
  }

  fn begin(&self) -> Result<(), InterceptError> {
    let mut state = self.lock();
    if state.in_transaction {
      return Err(InterceptError::AlreadyInTransaction);
    }
    state.calls.push(InterceptCall::Begin);
    state.in_transaction = true;
    Ok(())
  }

  fn update_thread(&self) -> Result<(), InterceptError> {
    let mut state = self.lock();
    state.require_transaction()?;
    state.calls.push(InterceptCall::UpdateThread);
    Ok(())
  }

  fn attach(&self, point: HookPoint) -> Result<(), InterceptError> {
    let mut state = self.lock();
    state.require_transaction()?;
    state.calls.push(InterceptCall::Attach(point));
    if state.fail_attach.contains(&point) {
      return Err(InterceptError::Hook {
        point,
        code: 9,
        message: "injected failure".to_string(),
      });
    }
    state.pending.push((true, point));
    Ok(())
  }

  fn detach(&self, point: HookPoint) -> Result<(), InterceptError> {
    let mut state = self.lock();
    state.require_transaction()?;
    state.calls.push(InterceptCall::Detach(point));
    state.pending.push((false, point));
    Ok(())
  }

  fn commit(&self) -> Result<(), InterceptError> {
    let mut state = self.lock();
    state.require_transaction()?;
    state.calls.push(InterceptCall::Commit);
    state.in_transaction = false;
    let pending = std::mem::take(&mut state.pending);

    if let Some(code) = state.fail_commit {
      return Err(InterceptError::Commit { code });
    }

    for (attach, point) in pending {
      if attach {
        if !state.installed.contains(&point) {
          state.installed.push(point);
        }
      } else {
        state.installed.retain(|p| *p != point);
      }
    }
    Ok(())
  }

  fn abort(&self) {
    let mut state = self.lock();
    state.calls.push(InterceptCall::Abort);
    state.in_transaction = false;
    state.pending.clear();
  }
}
