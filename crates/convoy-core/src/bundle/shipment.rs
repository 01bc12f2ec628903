//! The aggregate used by shipment goals

use std::collections::BTreeMap;

use convoy_git::ConfigRepository;

use super::{ChangesetBundle, GoalScope, SupportProject, acquire};
use crate::context::Context;
use crate::id::ShipmentId;
use crate::layout::Layout;
use crate::lock::LockHandle;
use crate::state::ShipmentFile;
use crate::{Error, Result};

/// A shipment and the bundles it spans.
///
/// The shipment itself is locked under `<name>.shipment`; member bundles
/// are locked in name order once they are known, so two shipments sharing
/// bundles cannot deadlock.
pub struct ShipmentBundle<'a> {
    ctx: &'a Context<'a>,
    repo: &'a ConfigRepository,
    id: ShipmentId,
    lock: Option<LockHandle<'a>>,
    members: BTreeMap<String, ChangesetBundle<'a>>,
}

impl std::fmt::Debug for ShipmentBundle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShipmentBundle")
            .field("id", &self.id)
            .field("locked", &self.is_locked())
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<'a> ShipmentBundle<'a> {
    pub fn new(ctx: &'a Context<'a>, repo: &'a ConfigRepository, id: ShipmentId) -> Self {
        Self {
            ctx,
            repo,
            id,
            lock: None,
            members: BTreeMap::new(),
        }
    }

    fn lock_key(&self) -> String {
        format!("{}.shipment", self.id.bundle_name)
    }

    pub fn id(&self) -> &ShipmentId {
        &self.id
    }

    pub fn context(&self) -> &'a Context<'a> {
        self.ctx
    }

    pub fn repo(&self) -> &'a ConfigRepository {
        self.repo
    }

    pub fn layout(&self) -> &'a Layout {
        &self.ctx.settings.layout
    }

    pub fn load_file(&self) -> Result<Option<ShipmentFile>> {
        ShipmentFile::load(self.repo, self.layout(), &self.id)
    }

    pub fn require_file(&self) -> Result<ShipmentFile> {
        self.load_file()?
            .ok_or_else(|| Error::build(format!("Shipment {} does not exist", self.id)))
    }

    pub fn save_file(&self, file: &ShipmentFile) -> Result<String> {
        file.save(self.repo, self.layout(), &self.id)?;
        Ok(self.layout().shipment(&self.id.bundle_name, &self.id.version))
    }

    /// Lock and load the member bundles `names`.
    ///
    /// The working copy is reset again once every member is locked, so
    /// member files are read only under their locks. Every member must have
    /// a configuration.
    pub fn add_members(&mut self, names: &[String]) -> Result<()> {
        let mut names = names.to_vec();
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(Error::build(format!("Shipment {} names no bundles", self.id)));
        }

        for name in &names {
            let mut member = ChangesetBundle::new(self.ctx, self.repo, name.clone());
            member.lock()?;
            self.members.insert(name.clone(), member);
        }
        self.repo.reset()?;
        for member in self.members.values_mut() {
            member.load()?;
            member.config()?;
        }
        tracing::debug!(shipment = %self.id, members = ?names, "Shipment members locked");
        Ok(())
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn member(&mut self, name: &str) -> Result<&mut ChangesetBundle<'a>> {
        let id = &self.id;
        self.members
            .get_mut(name)
            .ok_or_else(|| Error::build(format!("Bundle '{name}' is not part of shipment {id}")))
    }

    /// Support projects of every member, keyed by bundle.
    pub fn init_support_projects(
        &mut self,
        shallow: bool,
    ) -> Result<BTreeMap<String, Vec<SupportProject>>> {
        let mut all = BTreeMap::new();
        for (name, member) in &mut self.members {
            all.insert(name.clone(), member.init_support_projects(shallow)?);
        }
        Ok(all)
    }
}

impl GoalScope for ShipmentBundle<'_> {
    fn label(&self) -> String {
        self.id.to_string()
    }

    fn lock(&mut self) -> Result<()> {
        if self.lock.is_none() {
            self.lock = Some(acquire(self.ctx, self.repo, &self.lock_key())?);
        }
        Ok(())
    }

    fn unlock(&mut self) {
        while let Some((_, mut member)) = self.members.pop_last() {
            member.unlock();
        }
        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }
    }

    fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn channel(&self) -> Option<String> {
        self.members
            .values()
            .find_map(|m| m.channel())
            .or_else(|| self.ctx.settings.notifications.default_channel.clone())
    }
}

impl Drop for ShipmentBundle<'_> {
    fn drop(&mut self) {
        self.unlock();
    }
}
