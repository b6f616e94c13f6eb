//! In-memory service subsystem and marker for tests.

use super::backend::{RunState, ServiceBackend, ServiceSpec};
use super::marker::MarkerStore;
use crate::error::ServiceError;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct FakeState {
  pub services: BTreeMap<String, (ServiceSpec, RunState)>,
  pub calls: Vec<String>,
  pub not_elevated: bool,
  pub fail_create: bool,
  pub fail_start: bool,
  pub fail_delete_of: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeBackend(pub Rc<RefCell<FakeState>>);

impl FakeBackend {
  pub fn with_driver(name: &str) -> Self {
    let fake = Self::default();
    fake.0.borrow_mut().services.insert(
      name.to_string(),
      (
        ServiceSpec {
          name: name.to_string(),
          executable: "C:\\Windows\\System32\\drivers\\WinDivert64.sys".into(),
          arguments: String::new(),
          display_name: name.to_string(),
          description: String::new(),
        },
        RunState::Running,
      ),
    );
    fake
  }

  pub fn service(&self, name: &str) -> Option<(ServiceSpec, RunState)> {
    self.0.borrow().services.get(name).cloned()
  }

  pub fn calls(&self) -> Vec<String> {
    self.0.borrow().calls.clone()
  }

  fn missing(name: &str) -> ServiceError {
    ServiceError::Command(format!(
      "[SC] OpenService FAILED 1060: The specified service does not exist as an installed service. ({name})"
    ))
  }
}

impl ServiceBackend for FakeBackend {
  fn is_elevated(&self) -> bool {
    !self.0.borrow().not_elevated
  }

  fn stop(&self, name: &str) -> Result<(), ServiceError> {
    let mut st = self.0.borrow_mut();
    st.calls.push(format!("stop {name}"));
    match st.services.get_mut(name) {
      Some((_, state)) => {
        *state = RunState::Stopped;
        Ok(())
      }
      None => Err(Self::missing(name)),
    }
  }

  fn delete(&self, name: &str) -> Result<(), ServiceError> {
    let mut st = self.0.borrow_mut();
    st.calls.push(format!("delete {name}"));
    if st.fail_delete_of.as_deref() == Some(name) {
      return Err(ServiceError::DeleteFailed("Access is denied.".to_string()));
    }
    match st.services.remove(name) {
      Some(_) => Ok(()),
      None => Err(ServiceError::DeleteFailed(format!(
        "[SC] OpenService FAILED 1060: ({name})"
      ))),
    }
  }

  fn create(&self, spec: &ServiceSpec) -> Result<(), ServiceError> {
    let mut st = self.0.borrow_mut();
    st.calls.push(format!("create {}", spec.name));
    if st.fail_create {
      return Err(ServiceError::CreateFailed("Access is denied.".to_string()));
    }
    if st.services.contains_key(&spec.name) {
      return Err(ServiceError::CreateFailed(
        "[SC] CreateService FAILED 1073: The specified service already exists.".to_string(),
      ));
    }
    st
      .services
      .insert(spec.name.clone(), (spec.clone(), RunState::Stopped));
    Ok(())
  }

  fn set_description(&self, name: &str, description: &str) -> Result<(), ServiceError> {
    let mut st = self.0.borrow_mut();
    st.calls.push(format!("description {name}"));
    match st.services.get_mut(name) {
      Some((spec, _)) => {
        spec.description = description.to_string();
        Ok(())
      }
      None => Err(Self::missing(name)),
    }
  }

  fn start(&self, name: &str) -> Result<(), ServiceError> {
    let mut st = self.0.borrow_mut();
    st.calls.push(format!("start {name}"));
    if st.fail_start {
      return Err(ServiceError::StartFailed(
        "[SC] StartService FAILED 1053".to_string(),
      ));
    }
    match st.services.get_mut(name) {
      Some((_, state)) => {
        *state = RunState::Running;
        Ok(())
      }
      None => Err(Self::missing(name)),
    }
  }

  fn kill_process(&self, image_name: &str) -> Result<(), ServiceError> {
    self.0.borrow_mut().calls.push(format!("kill {image_name}"));
    Err(ServiceError::Absent(image_name.to_string()))
  }

  fn query_state(&self, name: &str) -> Result<RunState, ServiceError> {
    Ok(
      self
        .0
        .borrow()
        .services
        .get(name)
        .map(|(_, s)| *s)
        .unwrap_or(RunState::NotInstalled),
    )
  }
}

#[derive(Debug, Clone, Default)]
pub struct FakeMarker {
  value: Rc<RefCell<Option<String>>>,
  fail_write: Rc<Cell<bool>>,
}

impl FakeMarker {
  pub fn get(&self) -> Option<String> {
    self.value.borrow().clone()
  }

  pub fn set(&self, v: Option<&str>) {
    *self.value.borrow_mut() = v.map(str::to_string);
  }

  pub fn fail_writes(&self) {
    self.fail_write.set(true);
  }
}

impl MarkerStore for FakeMarker {
  fn read(&self) -> Result<Option<String>, ServiceError> {
    Ok(self.get())
  }

  fn write(&self, variant: &str) -> Result<(), ServiceError> {
    if self.fail_write.get() {
      return Err(ServiceError::Marker("Access is denied.".to_string()));
    }
    self.set(Some(variant));
    Ok(())
  }

  fn clear(&self) -> Result<(), ServiceError> {
    self.set(None);
    Ok(())
  }
}
