//! Mock DeviceHandle for testing.
//!
//! Stores programs in memory and records every call for assertions.
//! Like a real controller, the reported program list is only refreshed by
//! `reload()`. Failures can be injected per operation and per program id.

#![allow(dead_code)]

use pattern_sync::device::{BinaryKind, BoxFuture, Command, DeviceError, DeviceHandle, DeviceProps, ProgramEntry, ProgramId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Device operation, for failure rules and call filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Reload,
    Get,
    GetControls,
    Put,
    Delete,
    SetCommand,
}

/// A recorded call (including failed attempts).
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Reload,
    Get(String, BinaryKind),
    Put(String, Vec<u8>),
    Delete(String),
    SetCommand(Command),
}

impl DeviceCall {
    pub fn op(&self) -> Op {
        match self {
            DeviceCall::Reload => Op::Reload,
            DeviceCall::Get(_, BinaryKind::Program) => Op::Get,
            DeviceCall::Get(_, BinaryKind::Controls) => Op::GetControls,
            DeviceCall::Put(..) => Op::Put,
            DeviceCall::Delete(_) => Op::Delete,
            DeviceCall::SetCommand(_) => Op::SetCommand,
        }
    }
}

/// Calls from several devices in global order, labelled by device.
pub type Journal = Arc<Mutex<Vec<(String, DeviceCall)>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

struct FailRule {
    op: Op,
    program: Option<String>,
    /// Matching calls that still succeed before failures start.
    skip: usize,
    /// `None` = fail forever.
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    programs: Vec<(ProgramId, Vec<u8>)>,
    controls: HashMap<ProgramId, Vec<u8>>,
    reported: Vec<ProgramId>,
    calls: Vec<DeviceCall>,
    rules: Vec<FailRule>,
}

/// In-memory controller that records all calls.
///
/// # Example
/// ```rust,ignore
/// let source = MockDevice::named("Croquetia1")
///     .with_program("1", b"one")
///     .with_controls("1", b"ctl")
///     .into_arc();
///
/// source.fail_next(Op::Put, 2);
/// // ... run an operation ...
/// assert_eq!(source.count(Op::Put), 3);
/// ```
pub struct MockDevice {
    name: Option<String>,
    latency: Duration,
    journal: Option<(String, Journal)>,
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDevice {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            latency: Duration::ZERO,
            journal: None,
            state: Mutex::new(State::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn unnamed() -> Self {
        Self {
            name: None,
            ..Self::named("")
        }
    }

    /// Add a program. The reported list includes it immediately.
    pub fn with_program(self, id: &str, data: &[u8]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.programs.push((ProgramId::from(id), data.to_vec()));
            state.reported.push(ProgramId::from(id));
        }
        self
    }

    pub fn with_controls(self, id: &str, data: &[u8]) -> Self {
        self.state.lock().unwrap().controls.insert(ProgramId::from(id), data.to_vec());
        self
    }

    /// Every call sleeps this long before completing.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Also record calls into a journal shared with other devices.
    pub fn with_journal(mut self, label: &str, journal: &Journal) -> Self {
        self.journal = Some((label.to_string(), Arc::clone(journal)));
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// The next `n` calls of `op` fail.
    pub fn fail_next(&self, op: Op, n: usize) {
        self.add_rule(op, None, 0, Some(n));
    }

    /// Every call of `op` fails.
    pub fn fail_always(&self, op: Op) {
        self.add_rule(op, None, 0, None);
    }

    /// The first `n` calls of `op` succeed, every later one fails.
    pub fn fail_after(&self, op: Op, n: usize) {
        self.add_rule(op, None, n, None);
    }

    /// Every call of `op` on `program` fails.
    pub fn fail_program(&self, op: Op, program: &str) {
        self.add_rule(op, Some(program.to_string()), 0, None);
    }

    /// Remove all failure rules.
    pub fn heal(&self) {
        self.state.lock().unwrap().rules.clear();
    }

    fn add_rule(&self, op: Op, program: Option<String>, skip: usize, remaining: Option<usize>) {
        self.state.lock().unwrap().rules.push(FailRule {
            op,
            program,
            skip,
            remaining,
        });
    }

    // =========================================================================
    // Assertions
    // =========================================================================

    /// Actual stored program ids, in storage order.
    pub fn program_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .programs
            .iter()
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Program ids as currently reported by `props()`.
    pub fn reported_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().reported.iter().map(|id| id.to_string()).collect()
    }

    pub fn program_data(&self, id: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .programs
            .iter()
            .find(|(p, _)| p.as_str() == id)
            .map(|(_, data)| data.clone())
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::Delete(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::Put(id, _) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::SetCommand(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Highest number of calls that overlapped in time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Record the call and decide whether it fails.
    fn begin(&self, call: DeviceCall, program: Option<&str>) -> Result<(), DeviceError> {
        let op = call.op();
        if let Some((label, journal)) = &self.journal {
            journal.lock().unwrap().push((label.clone(), call.clone()));
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);

        for rule in state.rules.iter_mut() {
            if rule.op != op {
                continue;
            }
            if rule.program.is_some() && rule.program.as_deref() != program {
                continue;
            }
            if rule.skip > 0 {
                rule.skip -= 1;
                continue;
            }
            match rule.remaining.as_mut() {
                None => return Err(DeviceError::new(format!("injected {:?} failure", op))),
                Some(0) => continue,
                Some(n) => {
                    *n -= 1;
                    return Err(DeviceError::new(format!("injected {:?} failure", op)));
                }
            }
        }
        Ok(())
    }

    async fn latency(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DeviceHandle for MockDevice {
    fn props(&self) -> DeviceProps {
        let state = self.state.lock().unwrap();
        DeviceProps {
            name: self.name.clone(),
            program_list: state.reported.iter().cloned().map(ProgramEntry::new).collect(),
            ..Default::default()
        }
    }

    fn reload(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let outcome = self.begin(DeviceCall::Reload, None);
            self.latency().await;
            outcome?;
            let mut state = self.state.lock().unwrap();
            state.reported = state.programs.iter().map(|(id, _)| id.clone()).collect();
            Ok(())
        })
    }

    fn get_program_binary<'a>(&'a self, id: &'a str, kind: BinaryKind) -> BoxFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let outcome = self.begin(DeviceCall::Get(id.to_string(), kind), Some(id));
            self.latency().await;
            outcome?;
            let state = self.state.lock().unwrap();
            let data = match kind {
                BinaryKind::Program => state
                    .programs
                    .iter()
                    .find(|(p, _)| p.as_str() == id)
                    .map(|(_, data)| data.clone()),
                BinaryKind::Controls => state.controls.get(&ProgramId::from(id)).cloned(),
            };
            Ok(data.unwrap_or_default())
        })
    }

    fn put_program_binary<'a>(&'a self, id: &'a str, data: &'a [u8]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let outcome = self.begin(DeviceCall::Put(id.to_string(), data.to_vec()), Some(id));
            self.latency().await;
            outcome?;
            let mut state = self.state.lock().unwrap();
            match state.programs.iter_mut().find(|(p, _)| p.as_str() == id) {
                Some((_, existing)) => *existing = data.to_vec(),
                None => state.programs.push((ProgramId::from(id), data.to_vec())),
            }
            Ok(())
        })
    }

    fn delete_program<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let outcome = self.begin(DeviceCall::Delete(id.to_string()), Some(id));
            self.latency().await;
            outcome?;
            let mut state = self.state.lock().unwrap();
            state.programs.retain(|(p, _)| p.as_str() != id);
            state.controls.remove(&ProgramId::from(id));
            Ok(())
        })
    }

    fn set_command(&self, command: Command) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let outcome = self.begin(DeviceCall::SetCommand(command), None);
            self.latency().await;
            outcome
        })
    }
}
