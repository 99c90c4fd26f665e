//! The broad phase world.
//!
//! [`BroadPhase`] owns the tracked objects, one of the spatial index
//! strategies, the filtering stage and the interaction table. Changes made
//! between steps are batched, and [`BroadPhase::step`] turns them into
//! pair found/lost events and out-of-bounds notifications.

use std::{
    collections::{HashSet, VecDeque},
    fmt,
    sync::Arc,
};

use crate::{error::BroadPhaseError, math::Axis};

pub mod aabb;
use aabb::AABB;

pub mod aggregate;
use aggregate::{AggregateHandle, AggregateSet};

mod auto_grid;
pub use auto_grid::AutoGridParams;

mod bitmatrix;

pub mod bounds_tracker;
use bounds_tracker::{BoundsEvent, BoundsState, BoundsTarget, BoundsTracker};

mod cells;

pub mod events;
use events::StepEvents;

pub mod filter;
use filter::{FilterCallback, FilterData, FilterJob, FilterPairInput, FilterShader, FilterStage};

pub mod interaction;
use interaction::{Interaction, InteractionTable, ObjectPair};

pub mod object_set;
use object_set::{ObjectDesc, ObjectHandle, ObjectSet, TrackedObject};

mod pairs;
use pairs::{Pair, PairDelta, PairTracker};

pub mod region;
use region::{RegionHandle, RegionInfo};

mod region_grid;
mod sap;

mod spatial_index;
use spatial_index::{ProxyId, ProxyPair, SpatialIndex};


//

/// Hard upper limit for [`BroadPhaseParams::max_regions`].
pub const MAX_REGIONS: usize = 256;

/// Which spatial index algorithm to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum IndexStrategy {
    /// Incremental sort and sweep on all three axes.
    ///
    /// Needs no world bounds and is cheap when most objects are still,
    /// but gets slow when lots of objects move or are inserted at once.
    #[default]
    SweepAndPrune,
    /// Objects are binned into explicitly defined regions and only
    /// tested against objects sharing a region with them.
    ///
    /// Requires [`world_bounds`][BroadPhaseParams::world_bounds].
    /// Objects outside every region are out of bounds.
    Regions,
    /// Like [`Regions`][Self::Regions], but the regions are a grid
    /// fitted to the tracked objects automatically.
    AutoGrid,
}

/// Configuration of a [`BroadPhase`].
#[derive(Clone)]
pub struct BroadPhaseParams {
    pub strategy: IndexStrategy,
    /// Area the regions must lie in. Required by [`IndexStrategy::Regions`],
    /// ignored by the others.
    pub world_bounds: Option<AABB>,
    /// If nonzero, the world bounds are split into this many regions
    /// along each horizontal axis when the broad phase is created.
    /// See [`regions_from_world_bounds`][region::regions_from_world_bounds].
    pub region_subdivisions: u32,
    /// Axis pointing up. Regions and grid cells are laid out
    /// on the plane perpendicular to it.
    pub up_axis: Axis,
    pub filter_shader: FilterShader,
    /// Read-only data passed to every call of the filter shader.
    pub filter_constants: Vec<u8>,
    /// Maximum number of active interactions per object.
    pub interaction_cap: usize,
    /// Maximum number of regions alive at once, at most [`MAX_REGIONS`].
    pub max_regions: usize,
    /// How many newly inserted objects are added to the spatial index per step.
    /// The rest wait in insertion order for the following steps.
    /// `None` adds everything right away.
    pub max_inserts_per_step: Option<usize>,
    pub auto_grid: AutoGridParams,
}

impl Default for BroadPhaseParams {
    fn default() -> Self {
        Self {
            strategy: IndexStrategy::default(),
            world_bounds: None,
            region_subdivisions: 0,
            up_axis: Axis::Y,
            filter_shader: filter::default_filter_shader,
            filter_constants: Vec::new(),
            interaction_cap: 65535,
            max_regions: MAX_REGIONS,
            max_inserts_per_step: None,
            auto_grid: AutoGridParams::default(),
        }
    }
}

impl fmt::Debug for BroadPhaseParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadPhaseParams")
            .field("strategy", &self.strategy)
            .field("world_bounds", &self.world_bounds)
            .field("region_subdivisions", &self.region_subdivisions)
            .field("up_axis", &self.up_axis)
            .field("filter_constants", &self.filter_constants.len())
            .field("interaction_cap", &self.interaction_cap)
            .field("max_regions", &self.max_regions)
            .field("max_inserts_per_step", &self.max_inserts_per_step)
            .field("auto_grid", &self.auto_grid)
            .finish()
    }
}

impl BroadPhaseParams {
    fn validate(&self) -> Result<(), BroadPhaseError> {
        if let Some(world) = &self.world_bounds {
            if !world.is_valid() {
                return Err(BroadPhaseError::InvalidGeometry(
                    "world bounds must be finite with min <= max",
                ));
            }
        }
        if self.strategy == IndexStrategy::Regions && self.world_bounds.is_none() {
            return Err(BroadPhaseError::InvalidConfiguration(
                "the region strategy requires world bounds",
            ));
        }
        if self.interaction_cap == 0 {
            return Err(BroadPhaseError::InvalidConfiguration(
                "interaction cap must be at least 1",
            ));
        }
        if self.max_regions == 0 || self.max_regions > MAX_REGIONS {
            return Err(BroadPhaseError::InvalidConfiguration(
                "max regions must be between 1 and 256",
            ));
        }
        if self.max_inserts_per_step == Some(0) {
            return Err(BroadPhaseError::InvalidConfiguration(
                "insert budget must be at least 1 if set",
            ));
        }
        Ok(())
    }
}

/// What the active spatial index needs from the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BroadPhaseCaps {
    /// Whether regions must be added for any pairs to be found.
    pub requires_explicit_regions: bool,
    /// How many regions can exist at once, 0 if regions aren't supported.
    pub max_regions: usize,
}

//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProxyOwner {
    Object(ObjectHandle),
    Aggregate(AggregateHandle),
}

/// Hands out proxy ids for the spatial index.
///
/// Released ids keep their owner until [`recycle`][Self::recycle] is called
/// at the end of a step, so that pairs lost because of a removal can still
/// be mapped back to the removed object.
#[derive(Debug, Default)]
struct ProxyAllocator {
    owners: Vec<Option<ProxyOwner>>,
    free: Vec<ProxyId>,
    released: Vec<ProxyId>,
}

impl ProxyAllocator {
    fn alloc(&mut self, owner: ProxyOwner) -> ProxyId {
        match self.free.pop() {
            Some(id) => {
                self.owners[id.idx()] = Some(owner);
                id
            }
            None => {
                let id = ProxyId(self.owners.len() as u32);
                self.owners.push(Some(owner));
                id
            }
        }
    }

    #[inline]
    fn release(&mut self, id: ProxyId) {
        self.released.push(id);
    }

    #[inline]
    fn owner(&self, id: ProxyId) -> Option<ProxyOwner> {
        self.owners.get(id.idx()).copied().flatten()
    }

    fn recycle(&mut self) {
        for id in self.released.drain(..) {
            self.owners[id.idx()] = None;
            self.free.push(id);
        }
    }
}

//

/// Broad phase collision detection for a population of bounding boxes.
///
/// Calls that change anything take effect at the next [`step`][Self::step],
/// which reports everything that happened since the previous one.
/// Every error returned by a call is also logged and included in the
/// [`diagnostics`][StepEvents::diagnostics] of the next step.
pub struct BroadPhase {
    objects: ObjectSet,
    aggregates: AggregateSet,
    index: Box<dyn SpatialIndex>,
    proxies: ProxyAllocator,
    pending_inserts: VecDeque<ObjectHandle>,
    max_inserts_per_step: Option<usize>,
    bounds: BoundsTracker,
    // all overlapping object pairs, net changes become pair events
    object_pairs: PairTracker<ObjectHandle>,
    // object pairs found directly by the index
    direct: HashSet<ObjectPair>,
    // object pairs found by testing aggregate members
    derived: HashSet<ObjectPair>,
    // index pairs with an aggregate on at least one side
    aggregate_proxy_pairs: HashSet<ProxyPair>,
    filter: FilterStage,
    interactions: InteractionTable,
    pending: StepEvents,
}

impl fmt::Debug for BroadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadPhase")
            .field("objects", &self.objects.len())
            .field("pending_inserts", &self.pending_inserts.len())
            .field("overlapping_pairs", &self.object_pairs.len())
            .field("interactions", &self.interactions.len())
            .field("out_of_bounds", &self.bounds.out_count())
            .field("filter", &self.filter)
            .finish()
    }
}

impl BroadPhase {
    pub fn new(params: BroadPhaseParams) -> Result<Self, BroadPhaseError> {
        params.validate()?;

        let mut index: Box<dyn SpatialIndex> = match params.strategy {
            IndexStrategy::SweepAndPrune => Box::new(sap::SweepAndPrune::new()),
            IndexStrategy::Regions => Box::new(region_grid::RegionGrid::new(
                params.world_bounds.unwrap_or_else(AABB::zero),
                params.max_regions,
            )),
            IndexStrategy::AutoGrid => Box::new(auto_grid::AutoGrid::new(
                params.auto_grid,
                params.up_axis,
            )),
        };

        if let (IndexStrategy::Regions, Some(world), n @ 1..) = (
            params.strategy,
            params.world_bounds,
            params.region_subdivisions,
        ) {
            let tiles = region::regions_from_world_bounds(world, n, params.up_axis);
            for (tile_idx, tile) in tiles.into_iter().enumerate() {
                index.add_region(tile, tile_idx as u64, false)?;
            }
        }

        log::debug!("created broad phase with {:?}", params);

        Ok(Self {
            objects: ObjectSet::new(),
            aggregates: AggregateSet::new(),
            index,
            proxies: ProxyAllocator::default(),
            pending_inserts: VecDeque::new(),
            max_inserts_per_step: params.max_inserts_per_step,
            bounds: BoundsTracker::new(),
            object_pairs: PairTracker::new(),
            direct: HashSet::new(),
            derived: HashSet::new(),
            aggregate_proxy_pairs: HashSet::new(),
            filter: FilterStage::new(params.filter_shader, params.filter_constants),
            interactions: InteractionTable::new(params.interaction_cap),
            pending: StepEvents::default(),
        })
    }

    pub fn caps(&self) -> BroadPhaseCaps {
        BroadPhaseCaps {
            requires_explicit_regions: self.index.requires_explicit_regions(),
            max_regions: self.index.max_regions(),
        }
    }

    #[inline]
    pub fn requires_explicit_regions(&self) -> bool {
        self.index.requires_explicit_regions()
    }

    /// Log an error and queue it as a diagnostic, passing the result through.
    fn report<T>(&mut self, result: Result<T, BroadPhaseError>) -> Result<T, BroadPhaseError> {
        if let Err(err) = &result {
            log::warn!("{}", err);
            self.pending.diagnostics.push(err.clone());
        }
        result
    }

    //
    // objects
    //

    /// Start tracking an object. It joins the spatial index at the next step,
    /// or a later one if the insert budget for the step has been used up.
    pub fn insert(&mut self, desc: ObjectDesc) -> Result<ObjectHandle, BroadPhaseError> {
        if let Err(err) = desc.validate() {
            return self.report(Err(err));
        }
        let handle = self.objects.insert(desc);
        self.pending_inserts.push_back(handle);
        Ok(handle)
    }

    /// Set the bounding box of an object.
    pub fn update(&mut self, handle: ObjectHandle, aabb: AABB) -> Result<(), BroadPhaseError> {
        let result = self.try_update(handle, aabb);
        self.report(result)
    }

    /// Same as [`update`][Self::update].
    #[inline]
    pub fn notify_shape_aabb_changed(
        &mut self,
        handle: ObjectHandle,
        aabb: AABB,
    ) -> Result<(), BroadPhaseError> {
        self.update(handle, aabb)
    }

    fn try_update(&mut self, handle: ObjectHandle, aabb: AABB) -> Result<(), BroadPhaseError> {
        if !aabb.is_valid() {
            return Err(BroadPhaseError::InvalidGeometry(
                "bounding boxes must be finite with min <= max",
            ));
        }
        let obj = self.objects.try_get_mut(handle)?;
        obj.aabb = aabb;
        if let Some(proxy) = obj.proxy {
            self.index.update(proxy, aabb);
            self.bounds.mark(proxy);
        }
        if let Some(agg) = obj.aggregate.and_then(|a| self.aggregates.get_mut(a)) {
            agg.dirty = true;
        }
        Ok(())
    }

    /// Stop tracking an object. Its pairs are reported lost at the next step.
    pub fn remove(&mut self, handle: ObjectHandle) -> Result<TrackedObject, BroadPhaseError> {
        let Some(obj) = self.objects.remove(handle) else {
            return self.report(Err(BroadPhaseError::StaleObject(handle)));
        };
        if let Some(proxy) = obj.proxy {
            self.detach_proxy(proxy);
        }
        if let Some(agg) = obj.aggregate.and_then(|a| self.aggregates.get_mut(a)) {
            agg.members.retain(|&m| m != handle);
            agg.dirty = true;
        }
        self.direct.retain(|pair| !pair.contains(handle));
        self.object_pairs.remove_all_with(handle);
        Ok(obj)
    }

    fn detach_proxy(&mut self, proxy: ProxyId) {
        self.index.remove(proxy);
        self.bounds.forget(proxy);
        self.proxies.release(proxy);
    }

    #[inline]
    pub fn object(&self, handle: ObjectHandle) -> Option<&TrackedObject> {
        self.objects.get(handle)
    }

    #[inline]
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.objects.contains(handle)
    }

    /// Number of tracked objects, including ones still waiting to be inserted.
    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.len() == 0
    }

    /// The proxy that represents the object in the spatial index,
    /// which is its aggregate's proxy if it's in one.
    fn proxy_of(&self, handle: ObjectHandle) -> Result<Option<ProxyId>, BroadPhaseError> {
        let obj = self.objects.try_get(handle)?;
        Ok(match obj.aggregate {
            Some(agg) => self.aggregates.get(agg).and_then(|a| a.proxy),
            None => obj.proxy,
        })
    }

    /// Whether the object (or the aggregate it's in) is outside every region.
    pub fn is_out_of_bounds(&self, handle: ObjectHandle) -> Result<bool, BroadPhaseError> {
        Ok(self
            .proxy_of(handle)?
            .map_or(false, |proxy| self.bounds.is_out(proxy)))
    }

    //
    // filtering
    //

    /// Set or clear the callback that filter shaders can defer pairs to.
    pub fn set_filter_callback(&mut self, callback: Option<Arc<dyn FilterCallback>>) {
        self.filter.set_callback(callback);
    }

    /// Replace an object's filter data and refilter its suppressed pairs.
    pub fn set_filter_data(
        &mut self,
        handle: ObjectHandle,
        data: FilterData,
    ) -> Result<(), BroadPhaseError> {
        match self.objects.get_mut(handle) {
            Some(obj) => obj.filter_data = data,
            None => return self.report(Err(BroadPhaseError::StaleObject(handle))),
        }
        self.notify_filter_data_changed(handle)
    }

    /// Run the filter again for every pair of the object that was suppressed
    /// and still overlaps. Pairs that get accepted are reported in the next
    /// step's events.
    pub fn notify_filter_data_changed(&mut self, handle: ObjectHandle) -> Result<(), BroadPhaseError> {
        if !self.objects.contains(handle) {
            return self.report(Err(BroadPhaseError::StaleObject(handle)));
        }
        for pair in self.interactions.suppressed_pairs_of(handle) {
            // separated since the last step, the next step ends it
            if !self.still_overlapping(pair) {
                continue;
            }
            let Some(job) = self.filter_job(pair) else {
                continue;
            };
            let decision = self.filter.run(&job);
            let result = self.interactions.refilter(pair, decision, &mut self.pending);
            // an error here is already a diagnostic, the call itself succeeded
            self.report(result).ok();
        }
        Ok(())
    }

    /// Forget every filter decision involving the object and filter all of
    /// its overlapping pairs again, including killed ones.
    pub fn reset_filtering(&mut self, handle: ObjectHandle) -> Result<(), BroadPhaseError> {
        if !self.objects.contains(handle) {
            return self.report(Err(BroadPhaseError::StaleObject(handle)));
        }
        for pair in self.interactions.pairs_of(handle) {
            self.end_interaction(pair);
        }
        let mut pairs = self.object_pairs.reported_with(handle);
        pairs.retain(|&pair| self.still_overlapping(pair));
        self.filter_new_pairs(&pairs);
        Ok(())
    }

    /// Whether a pair is still tracked as overlapping and its boxes,
    /// including updates since the last step, still intersect.
    fn still_overlapping(&self, pair: ObjectPair) -> bool {
        if !self.object_pairs.contains(pair) {
            return false;
        }
        match (self.objects.get(pair.lo()), self.objects.get(pair.hi())) {
            (Some(a), Some(b)) => a.aabb.intersects(&b.aabb),
            _ => false,
        }
    }

    fn filter_job(&self, pair: ObjectPair) -> Option<FilterJob> {
        let a = self.objects.get(pair.lo())?;
        let b = self.objects.get(pair.hi())?;
        Some(FilterJob {
            objects: pair.as_array(),
            input: FilterPairInput {
                attributes: [a.attributes(), b.attributes()],
                data: [a.filter_data, b.filter_data],
            },
        })
    }

    fn filter_new_pairs(&mut self, pairs: &[ObjectPair]) {
        let jobs: Vec<FilterJob> = pairs
            .iter()
            .filter(|&&pair| self.interactions.get(pair).is_none())
            .filter_map(|&pair| self.filter_job(pair))
            .collect();
        let decisions = self.filter.run_batch(&jobs);
        for (job, decision) in jobs.iter().zip(decisions) {
            let pair = Pair::new(job.objects[0], job.objects[1]);
            let result = self.interactions.on_pair_found(pair, decision, &mut self.pending);
            self.report(result).ok();
        }
    }

    fn end_interaction(&mut self, pair: ObjectPair) {
        let Some(interaction) = self.interactions.on_pair_lost(pair, &mut self.pending) else {
            return;
        };
        if !interaction.via_callback {
            return;
        }
        if let Some(callback) = self.filter.callback() {
            let removed = !self.objects.contains(pair.lo()) || !self.objects.contains(pair.hi());
            callback.pair_lost(pair.as_array(), removed);
        }
    }

    /// The interaction between two objects, if they currently have one.
    pub fn interaction(&self, a: ObjectHandle, b: ObjectHandle) -> Option<&Interaction> {
        self.interactions.get(Pair::new(a, b))
    }

    /// Number of active interactions the object has.
    pub fn interaction_count(&self, handle: ObjectHandle) -> usize {
        self.interactions.active_count(handle)
    }

    //
    // regions
    //

    /// Add a region to the spatial index.
    ///
    /// With `populate`, every object touching the region joins it right away,
    /// which takes time linear in the number of objects. Otherwise objects
    /// join when they're next inserted or moved.
    pub fn add_region(
        &mut self,
        bounds: AABB,
        user_data: u64,
        populate: bool,
    ) -> Result<RegionHandle, BroadPhaseError> {
        let result = self.index.add_region(bounds, user_data, populate);
        if result.is_ok() && populate {
            for id in self.live_proxies() {
                self.bounds.mark(id);
            }
        }
        self.report(result)
    }

    /// Remove a region. Objects that were only in this region
    /// go out of bounds at the next step.
    pub fn remove_region(&mut self, region: RegionHandle) -> Result<(), BroadPhaseError> {
        let result = self.index.remove_region(region);
        match self.report(result) {
            Ok(members) => {
                for id in members {
                    self.bounds.mark(id);
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn regions(&self) -> Vec<RegionInfo> {
        self.index.regions()
    }

    /// The primary region of an object. An object touching several regions
    /// belongs to all of them, and the one with the lowest slot is primary.
    pub fn object_region(&self, handle: ObjectHandle) -> Result<Option<RegionHandle>, BroadPhaseError> {
        Ok(self.object_regions(handle)?.first().copied())
    }

    /// Every region an object belongs to, primary first.
    pub fn object_regions(&self, handle: ObjectHandle) -> Result<Vec<RegionHandle>, BroadPhaseError> {
        Ok(self
            .proxy_of(handle)?
            .map(|proxy| self.index.regions_of(proxy))
            .unwrap_or_default())
    }

    fn live_proxies(&self) -> Vec<ProxyId> {
        let objects = self.objects.iter().filter_map(|(_, obj)| obj.proxy);
        let aggregates = self.aggregates.iter().filter_map(|(_, agg)| agg.proxy);
        objects.chain(aggregates).collect()
    }

    //
    // aggregates
    //

    /// Create an empty aggregate that can hold up to `max_members` objects.
    /// Whether members are tested against each other can't be changed later.
    pub fn create_aggregate(
        &mut self,
        max_members: usize,
        self_collision: bool,
    ) -> Result<AggregateHandle, BroadPhaseError> {
        let result = self.aggregates.create(max_members, self_collision);
        if let Ok(handle) = &result {
            log::debug!(
                "created aggregate {:?} (max {} members, self collision {})",
                handle,
                max_members,
                self_collision
            );
        }
        self.report(result)
    }

    pub fn add_to_aggregate(
        &mut self,
        aggregate: AggregateHandle,
        object: ObjectHandle,
    ) -> Result<(), BroadPhaseError> {
        let result = self.try_add_to_aggregate(aggregate, object);
        self.report(result)
    }

    fn try_add_to_aggregate(
        &mut self,
        aggregate: AggregateHandle,
        object: ObjectHandle,
    ) -> Result<(), BroadPhaseError> {
        let agg = self
            .aggregates
            .get(aggregate)
            .ok_or(BroadPhaseError::StaleAggregate(aggregate))?;
        let obj = self.objects.try_get(object)?;
        if obj.aggregate.is_some() {
            return Err(BroadPhaseError::AlreadyInAggregate(object));
        }
        if agg.is_full() {
            return Err(BroadPhaseError::AggregateFull {
                aggregate,
                cap: agg.max_members,
            });
        }

        let agg = self.aggregates.try_get_mut(aggregate)?;
        agg.members.push(object);
        agg.dirty = true;
        let obj = self.objects.try_get_mut(object)?;
        obj.aggregate = Some(aggregate);
        if let Some(proxy) = obj.proxy.take() {
            self.detach_proxy(proxy);
        }
        Ok(())
    }

    /// Take an object out of an aggregate, returning it to direct tracking.
    pub fn remove_from_aggregate(
        &mut self,
        aggregate: AggregateHandle,
        object: ObjectHandle,
    ) -> Result<(), BroadPhaseError> {
        let result = self.try_remove_from_aggregate(aggregate, object);
        self.report(result)
    }

    fn try_remove_from_aggregate(
        &mut self,
        aggregate: AggregateHandle,
        object: ObjectHandle,
    ) -> Result<(), BroadPhaseError> {
        let agg = self.aggregates.try_get_mut(aggregate)?;
        let obj = self.objects.try_get_mut(object)?;
        if obj.aggregate != Some(aggregate) {
            return Err(BroadPhaseError::NotInAggregate { object, aggregate });
        }
        agg.members.retain(|&m| m != object);
        agg.dirty = true;
        obj.aggregate = None;
        self.pending_inserts.push_back(object);
        Ok(())
    }

    /// Delete an aggregate, returning its members to direct tracking.
    /// Returns the former members.
    pub fn release_aggregate(
        &mut self,
        aggregate: AggregateHandle,
    ) -> Result<Vec<ObjectHandle>, BroadPhaseError> {
        let Some(agg) = self.aggregates.remove(aggregate) else {
            return self.report(Err(BroadPhaseError::StaleAggregate(aggregate)));
        };
        if let Some(proxy) = agg.proxy {
            self.detach_proxy(proxy);
        }
        for &member in &agg.members {
            if let Some(obj) = self.objects.get_mut(member) {
                obj.aggregate = None;
                self.pending_inserts.push_back(member);
            }
        }
        log::debug!(
            "released aggregate {:?} with {} members",
            aggregate,
            agg.members.len()
        );
        Ok(agg.members)
    }

    pub fn aggregate_members(&self, aggregate: AggregateHandle) -> Result<&[ObjectHandle], BroadPhaseError> {
        self.aggregates
            .get(aggregate)
            .map(|agg| agg.members.as_slice())
            .ok_or(BroadPhaseError::StaleAggregate(aggregate))
    }

    //
    // step
    //

    /// Bring the spatial index up to date and report everything
    /// that happened since the previous step.
    pub fn step(&mut self) -> StepEvents {
        let _span = tracy_span!("broad phase step", "step");

        self.flush_inserts();
        self.update_aggregate_proxies();
        self.update_bounds();

        let mut delta = PairDelta::default();
        {
            let _span = tracy_span!("spatial index", "step");
            self.index.step(&mut delta);
        }
        let changed = self.translate_pairs(&delta);
        for pair in changed {
            if self.direct.contains(&pair) || self.derived.contains(&pair) {
                self.object_pairs.add(pair);
            } else {
                self.object_pairs.remove(pair);
            }
        }

        let mut object_delta = PairDelta::default();
        self.object_pairs.drain(&mut object_delta);
        for &pair in &object_delta.lost {
            self.end_interaction(pair);
        }
        self.filter_new_pairs(&object_delta.found);

        self.proxies.recycle();

        log::trace!(
            "broad phase step: {} objects, {} overlapping pairs ({} found, {} lost), {} interactions",
            self.objects.len(),
            self.object_pairs.len(),
            object_delta.found.len(),
            object_delta.lost.len(),
            self.interactions.len()
        );
        std::mem::take(&mut self.pending)
    }

    fn flush_inserts(&mut self) {
        let budget = self.max_inserts_per_step.unwrap_or(usize::MAX);
        let mut inserted = 0;
        while inserted < budget {
            let Some(handle) = self.pending_inserts.pop_front() else {
                break;
            };
            // removed, put in an aggregate or inserted twice since being queued
            let Some(obj) = self.objects.get_mut(handle) else {
                continue;
            };
            if obj.proxy.is_some() || obj.aggregate.is_some() {
                continue;
            }
            let proxy = self.proxies.alloc(ProxyOwner::Object(handle));
            obj.proxy = Some(proxy);
            self.index.insert(proxy, obj.aabb);
            self.bounds.mark(proxy);
            inserted += 1;
        }
        if !self.pending_inserts.is_empty() {
            log::trace!(
                "inserted {} objects, {} still queued",
                inserted,
                self.pending_inserts.len()
            );
        }
    }

    fn update_aggregate_proxies(&mut self) {
        for (handle, agg) in self.aggregates.iter_mut() {
            if !agg.dirty {
                continue;
            }
            agg.dirty = false;
            let boxes: Vec<(ObjectHandle, AABB)> = agg
                .members
                .iter()
                .filter_map(|&m| self.objects.get(m).map(|obj| (m, obj.aabb)))
                .collect();
            match (agg.proxy, aggregate::bounds_of(&boxes)) {
                (Some(proxy), Some(bounds)) => {
                    self.index.update(proxy, bounds);
                    self.bounds.mark(proxy);
                }
                (None, Some(bounds)) => {
                    let proxy = self.proxies.alloc(ProxyOwner::Aggregate(handle));
                    agg.proxy = Some(proxy);
                    self.index.insert(proxy, bounds);
                    self.bounds.mark(proxy);
                }
                (Some(proxy), None) => {
                    agg.proxy = None;
                    self.index.remove(proxy);
                    self.bounds.forget(proxy);
                    self.proxies.release(proxy);
                }
                (None, None) => {}
            }
        }
    }

    fn update_bounds(&mut self) {
        let index = &self.index;
        let proxies = &self.proxies;
        let transitions = self
            .bounds
            .update(|id| proxies.owner(id).map(|_| index.is_in_bounds(id)));
        for (id, state) in transitions {
            let target = match self.proxies.owner(id) {
                Some(ProxyOwner::Object(h)) => BoundsTarget::Object(h),
                Some(ProxyOwner::Aggregate(h)) => BoundsTarget::Aggregate(h),
                None => continue,
            };
            let event = match state {
                BoundsState::OutOfBounds => BoundsEvent::OutOfBounds(target),
                BoundsState::InBounds => BoundsEvent::BackInBounds(target),
            };
            log::debug!("{:?}", event);
            self.pending.bounds.push(event);
        }
    }

    /// Turn proxy pair changes from the index into object pairs whose
    /// overlap state may have changed.
    fn translate_pairs(&mut self, delta: &PairDelta<ProxyId>) -> HashSet<ObjectPair> {
        let mut changed = HashSet::new();
        for (pairs, found) in [(&delta.found, true), (&delta.lost, false)] {
            for &pair in pairs {
                let owners = (self.proxies.owner(pair.lo()), self.proxies.owner(pair.hi()));
                match owners {
                    (Some(ProxyOwner::Object(a)), Some(ProxyOwner::Object(b))) => {
                        let object_pair = Pair::new(a, b);
                        let was_changed = if found {
                            self.direct.insert(object_pair)
                        } else {
                            self.direct.remove(&object_pair)
                        };
                        if was_changed {
                            changed.insert(object_pair);
                        }
                    }
                    (Some(_), Some(_)) => {
                        if found {
                            self.aggregate_proxy_pairs.insert(pair);
                        } else {
                            self.aggregate_proxy_pairs.remove(&pair);
                        }
                    }
                    _ => {}
                }
            }
        }

        let derived = self.derive_member_pairs();
        changed.extend(self.derived.symmetric_difference(&derived).copied());
        self.derived = derived;
        changed
    }

    fn member_boxes(&self, owner: ProxyOwner) -> Vec<(ObjectHandle, AABB)> {
        match owner {
            ProxyOwner::Object(h) => self
                .objects
                .get(h)
                .map(|obj| vec![(h, obj.aabb)])
                .unwrap_or_default(),
            ProxyOwner::Aggregate(h) => self
                .aggregates
                .get(h)
                .map(|agg| {
                    agg.members
                        .iter()
                        .filter_map(|&m| self.objects.get(m).map(|obj| (m, obj.aabb)))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn derive_member_pairs(&self) -> HashSet<ObjectPair> {
        let mut derived = HashSet::new();
        for pair in &self.aggregate_proxy_pairs {
            let (Some(a), Some(b)) = (self.proxies.owner(pair.lo()), self.proxies.owner(pair.hi()))
            else {
                continue;
            };
            aggregate::cross_pairs(&self.member_boxes(a), &self.member_boxes(b), &mut derived);
        }
        for (handle, agg) in self.aggregates.iter() {
            if agg.self_collision && agg.members.len() > 1 {
                let mut members = self.member_boxes(ProxyOwner::Aggregate(handle));
                aggregate::self_pairs(&mut members, &mut derived);
            }
        }
        derived
    }
}
