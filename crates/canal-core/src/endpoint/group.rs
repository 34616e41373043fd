//! DAI trigger groups: a barrier that fires one physical trigger for every
//! member once all members have received the same command.
//!
//! The first arrival of a round stores the command and arms a countdown of
//! `members - 1`. Later arrivals with the same command count it down; an
//! arrival with a different command is rejected with
//! [`ComponentError::Busy`] and leaves the round untouched. The arrival that
//! reaches zero fires every member's physical trigger, in membership order,
//! and the first failure becomes the round's result.
//!
//! Each physical trigger runs on the member's own core: the closing arrival
//! runs its own and those of members on the current core, and sends the rest
//! over IDC as [`IdcOp::GroupTrigger`]. The round lock is not held while the
//! round fires; arrivals and membership changes meanwhile get `Busy`.
//!
//! Earlier arrivals do not wait for the round to close. They learn its
//! outcome through [`GroupMember::round_result`] when it fires.

use crate::component::CompId;
use crate::error::{ComponentError, Result};
use crate::idc::{CoreId, Idc, IdcOp, current_core};
use crate::state::TriggerCmd;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// One member of a trigger group.
pub trait GroupMember: Send + Sync {
    /// Core that owns the member.
    fn core(&self) -> CoreId {
        CoreId::PRIMARY
    }

    /// Execute `cmd` on the hardware. Runs on [`core`](Self::core).
    fn physical_trigger(&self, cmd: TriggerCmd) -> Result<()>;

    /// Learn the outcome of the round this member took part in.
    fn round_result(&self, _result: &Result<()>) {}
}

/// Outcome of one arrival at the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTrigger {
    /// The round is still waiting for `remaining` members.
    Pending {
        /// Members that have not arrived yet.
        remaining: usize,
    },
    /// This arrival closed the round and the trigger ran.
    Fired,
}

type Members = Vec<(CompId, Arc<dyn GroupMember>)>;

struct Round {
    members: Members,
    counter: usize,
    cmd: Option<TriggerCmd>,
    firing: bool,
    last_result: Result<()>,
    rounds_fired: u64,
}

impl Round {
    fn frozen(&self) -> bool {
        self.counter > 0 || self.firing
    }
}

/// A set of DAIs triggered together.
pub struct DaiGroup {
    id: u32,
    round: Mutex<Round>,
    idc: Arc<RwLock<Idc>>,
}

impl std::fmt::Debug for DaiGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let round = self.round.lock();
        f.debug_struct("DaiGroup")
            .field("id", &self.id)
            .field("members", &round.members.len())
            .field("counter", &round.counter)
            .field("cmd", &round.cmd)
            .field("firing", &round.firing)
            .finish_non_exhaustive()
    }
}

impl DaiGroup {
    fn new(id: u32, idc: Arc<RwLock<Idc>>) -> Self {
        Self {
            id,
            round: Mutex::new(Round {
                members: Vec::new(),
                counter: 0,
                cmd: None,
                firing: false,
                last_result: Ok(()),
                rounds_fired: 0,
            }),
            idc,
        }
    }

    /// Group identifier.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of members.
    pub fn members(&self) -> usize {
        self.round.lock().members.len()
    }

    /// Members still expected in the open round; zero when no round is open.
    pub fn pending(&self) -> usize {
        self.round.lock().counter
    }

    /// Command of the open round.
    pub fn pending_cmd(&self) -> Option<TriggerCmd> {
        let round = self.round.lock();
        if round.counter > 0 { round.cmd } else { None }
    }

    /// Rounds that reached the physical trigger.
    pub fn rounds_fired(&self) -> u64 {
        self.round.lock().rounds_fired
    }

    /// Result of the most recent physical trigger.
    pub fn last_result(&self) -> Result<()> {
        self.round.lock().last_result.clone()
    }

    fn join(&self, comp: CompId, member: Arc<dyn GroupMember>) -> Result<()> {
        let mut round = self.round.lock();
        if round.frozen() {
            return Err(ComponentError::Busy(format!("group {} is mid-trigger", self.id)));
        }
        if round.members.iter().any(|(id, _)| *id == comp) {
            return Err(ComponentError::invalid(format!("{comp} already in group {}", self.id)));
        }
        round.members.push((comp, member));
        Ok(())
    }

    fn leave(&self, comp: CompId) -> Result<usize> {
        let mut round = self.round.lock();
        if round.frozen() {
            return Err(ComponentError::Busy(format!("group {} is mid-trigger", self.id)));
        }
        round.members.retain(|(id, _)| *id != comp);
        Ok(round.members.len())
    }

    /// Register the arrival of `cmd` from member `arriving`.
    ///
    /// The closing arrival fires the round and returns its result; `arriving`
    /// is the member whose trigger is already running on this thread.
    pub fn trigger(&self, arriving: CompId, cmd: TriggerCmd) -> Result<GroupTrigger> {
        let members = {
            let mut round = self.round.lock();
            if round.members.is_empty() {
                return Err(ComponentError::invalid(format!("group {} has no members", self.id)));
            }
            if round.firing {
                return Err(ComponentError::Busy(format!("group {} is firing {:?}", self.id, round.cmd)));
            }

            if round.counter == 0 {
                round.cmd = Some(cmd);
                round.counter = round.members.len() - 1;
                tracing::debug!(group = self.id, ?cmd, members = round.members.len(), "trigger round opened");
            } else if round.cmd != Some(cmd) {
                tracing::error!(group = self.id, ?cmd, pending = ?round.cmd, "group busy with another command");
                return Err(ComponentError::Busy(format!(
                    "group {} is mid-barrier for {:?}",
                    self.id, round.cmd
                )));
            } else {
                round.counter -= 1;
            }

            if round.counter > 0 {
                return Ok(GroupTrigger::Pending {
                    remaining: round.counter,
                });
            }
            round.firing = true;
            round.members.clone()
        };

        let result = self.fire(arriving, &members, cmd);
        for (_, member) in &members {
            member.round_result(&result);
        }

        let mut round = self.round.lock();
        round.firing = false;
        round.rounds_fired += 1;
        round.last_result = result.clone();
        round.cmd = None;
        result.map(|()| GroupTrigger::Fired)
    }

    fn fire(&self, arriving: CompId, members: &[(CompId, Arc<dyn GroupMember>)], cmd: TriggerCmd) -> Result<()> {
        let here = current_core();
        let idc = self.idc.read().clone();
        let mut result = Ok(());
        for (comp, member) in members {
            let core = member.core();
            let outcome = if *comp == arriving || core == here {
                member.physical_trigger(cmd)
            } else {
                tracing::trace!(group = self.id, comp = comp.0, core = core.0, ?cmd, "group trigger over idc");
                idc.send(core, *comp, IdcOp::GroupTrigger(cmd)).map(|_| ())
            };
            if let Err(err) = outcome {
                tracing::error!(group = self.id, comp = comp.0, ?cmd, "physical trigger failed: {err}");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

/// Registry of live trigger groups, reference counted by membership.
#[derive(Debug, Default)]
pub struct DaiGroups {
    groups: Mutex<HashMap<u32, Arc<DaiGroup>>>,
    idc: Arc<RwLock<Idc>>,
}

impl DaiGroups {
    /// Empty registry. Until [`connect_cores`](Self::connect_cores) is
    /// called every member must live on the core that closes its rounds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route physical triggers of members on other cores through `idc`.
    pub fn connect_cores(&self, idc: &Idc) {
        *self.idc.write() = idc.clone();
    }

    /// Add `comp` to group `id`, creating the group on first use.
    pub fn join(&self, id: u32, comp: CompId, member: Arc<dyn GroupMember>) -> Result<Arc<DaiGroup>> {
        let group = {
            let mut groups = self.groups.lock();
            Arc::clone(
                groups
                    .entry(id)
                    .or_insert_with(|| Arc::new(DaiGroup::new(id, Arc::clone(&self.idc)))),
            )
        };
        group.join(comp, member)?;
        tracing::debug!(group = id, comp = comp.0, members = group.members(), "joined trigger group");
        Ok(group)
    }

    /// Remove `comp` from group `id`; the group disappears with its last
    /// member.
    pub fn leave(&self, id: u32, comp: CompId) -> Result<()> {
        let mut groups = self.groups.lock();
        let group = groups
            .get(&id)
            .ok_or_else(|| ComponentError::not_found(format!("dai group {id}")))?;
        if group.leave(comp)? == 0 {
            groups.remove(&id);
            tracing::debug!(group = id, "trigger group released");
        }
        Ok(())
    }

    /// Look up a live group.
    pub fn get(&self, id: u32) -> Option<Arc<DaiGroup>> {
        self.groups.lock().get(&id).cloned()
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    /// True when no group is live.
    pub fn is_empty(&self) -> bool {
        self.groups.lock().is_empty()
    }
}
