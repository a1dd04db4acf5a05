//! Test doubles for the network and the notification surface.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use url::Url;

use crate::net::{Method, Network, NetworkRequest, NetworkResponse};
use crate::notify::{Notifier, Severity};

pub const ORIGIN: &str = "http://portal.test";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Debug, Clone)]
pub enum Outcome {
  Respond(NetworkResponse),
  Fail,
}

/// Network that replays scripted outcomes per `METHOD url`.
///
/// Outcomes are consumed in order; the last one repeats. Unscripted
/// requests fail like an unreachable server.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, VecDeque<Outcome>>>,
  calls: Mutex<Vec<NetworkRequest>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn script(&self, method: Method, path: &str, outcome: Outcome) {
    let key = format!("{} {}", method, url(path));
    self
      .routes
      .lock()
      .unwrap()
      .entry(key)
      .or_default()
      .push_back(outcome);
  }

  pub fn respond(&self, method: Method, path: &str, status: u16, body: &str) {
    self.script(method, path, Outcome::Respond(NetworkResponse::new(status, body)));
  }

  pub fn fail(&self, method: Method, path: &str) {
    self.script(method, path, Outcome::Fail);
  }

  pub fn calls(&self) -> Vec<NetworkRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse> {
    let key = request.cache_key();
    self.calls.lock().unwrap().push(request);

    let outcome = {
      let mut routes = self.routes.lock().unwrap();
      match routes.get_mut(&key) {
        Some(queue) if queue.len() > 1 => queue.pop_front(),
        Some(queue) => queue.front().cloned(),
        None => None,
      }
    };

    match outcome {
      Some(Outcome::Respond(response)) => Ok(response),
      Some(Outcome::Fail) | None => Err(eyre!("Failed to fetch {}: connection refused", key)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCall {
  Message(String, Severity),
  Indicator(bool),
}

/// Notifier that records every call.
#[derive(Default)]
pub struct RecordingNotifier {
  calls: Mutex<Vec<UiCall>>,
}

impl RecordingNotifier {
  pub fn calls(&self) -> Vec<UiCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn indicator_calls(&self) -> Vec<bool> {
    self
      .calls()
      .into_iter()
      .filter_map(|c| match c {
        UiCall::Indicator(offline) => Some(offline),
        UiCall::Message(..) => None,
      })
      .collect()
  }

  pub fn messages(&self, severity: Severity) -> Vec<String> {
    self
      .calls()
      .into_iter()
      .filter_map(|c| match c {
        UiCall::Message(text, s) if s == severity => Some(text),
        _ => None,
      })
      .collect()
  }
}

impl Notifier for RecordingNotifier {
  fn show_transient_message(&self, text: &str, severity: Severity) {
    self
      .calls
      .lock()
      .unwrap()
      .push(UiCall::Message(text.to_string(), severity));
  }

  fn set_offline_indicator(&self, offline: bool) {
    self.calls.lock().unwrap().push(UiCall::Indicator(offline));
  }
}
