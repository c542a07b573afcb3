//! Per-widget animation resources and the controller that allocates, launches,
//! stops and frees them in step with screen visibility.
//!
//! Every entry point takes `&mut UiState`, so it can only run while the shared
//! UI lock is held. That is what lets teardown proceed without waiting for the
//! render task: a task that is not holding the lock cannot be inside a locked
//! section, and once it does get the lock it re-validates its launch before
//! touching anything.
//!
//! Runtime memory is grouped in one [`Runtime`] value, so the pixel buffer,
//! task stack and task control block are either all present or all absent.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::{PlaybackConfig, ResourceConfig};
use crate::host::{PixelCanvas, ScreenId, SharedUi, UiState, Widget, WidgetId};
use crate::library::AnimationLibrary;
use crate::memory::{MemoryRegion, RegionAllocator, RegionBuffer};
use crate::render::{stop_channel, RenderTask, StopSignal, TaskState};
use crate::{LottieError, Result};

/// Size of the scheduler's task control block, kept in fast memory.
pub const TASK_CONTROL_BLOCK_SIZE: usize = 352;

const PIXEL_ALIGNMENT: usize = 64;
const STACK_ALIGNMENT: usize = 16;
const CONTROL_BLOCK_ALIGNMENT: usize = 8;

/// Index of an [`AnimationResource`] in the resource table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u32);

impl ResourceId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of [`LifecycleController::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Created {
    pub id: ResourceId,
    /// The first launch allocated its buffers and spawned the render task.
    /// When `false` the resource stays registered and the next load retries.
    pub launched: bool,
}

/// Host lifecycle signals for a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenEvent {
    /// The screen is about to animate out.
    UnloadStart,
    /// The screen is no longer visible.
    Unloaded,
    /// The screen became the active one.
    Loaded,
}

/// Memory and task state of one launch.
#[derive(Debug)]
pub(crate) struct Runtime {
    pub(crate) launch: u64,
    pub(crate) canvas: PixelCanvas,
    task_stack: RegionBuffer,
    task_control: RegionBuffer,
    task: Option<JoinHandle<()>>,
    stop: StopSignal,
    pub(crate) task_state: TaskState,
}

impl Runtime {
    /// Pixel KiB, stack KiB and control block bytes held by this launch.
    fn footprint(&self) -> (usize, usize, usize) {
        (
            self.canvas.byte_len() / 1024,
            self.task_stack.len() / 1024,
            self.task_control.len(),
        )
    }
}

/// One animation widget's configuration plus, while launched, its runtime.
#[derive(Debug)]
pub struct AnimationResource {
    config: ResourceConfig,
    runtime: Option<Runtime>,
    launches: u64,
}

impl AnimationResource {
    fn new(config: ResourceConfig) -> Self {
        Self {
            config,
            runtime: None,
            launches: 0,
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Pixel buffer, task stack and control block are allocated.
    pub fn is_allocated(&self) -> bool {
        self.runtime.is_some()
    }

    /// A render task handle is held, i.e. teardown has not begun.
    pub fn has_task(&self) -> bool {
        self.runtime
            .as_ref()
            .is_some_and(|runtime| runtime.task.is_some())
    }

    pub fn task_state(&self) -> Option<TaskState> {
        self.runtime.as_ref().map(|runtime| runtime.task_state)
    }

    /// Number of launches attempted so far.
    pub fn launches(&self) -> u64 {
        self.launches
    }

    pub fn canvas(&self) -> Option<&PixelCanvas> {
        self.runtime.as_ref().map(|runtime| &runtime.canvas)
    }
}

/// Arena of animation resources, stored inside the lock-protected [`UiState`].
/// Slots freed by [`remove`](Self::remove) are handed out again.
#[derive(Debug, Default)]
pub(crate) struct ResourceTable {
    slots: Vec<Option<AnimationResource>>,
    free: Vec<u32>,
}

impl ResourceTable {
    fn insert(&mut self, resource: AnimationResource) -> ResourceId {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(resource);
            return ResourceId(index);
        }
        let id = ResourceId(self.slots.len() as u32);
        self.slots.push(Some(resource));
        id
    }

    fn get(&self, id: ResourceId) -> Option<&AnimationResource> {
        self.slots.get(id.0 as usize)?.as_ref()
    }

    fn get_mut(&mut self, id: ResourceId) -> Option<&mut AnimationResource> {
        self.slots.get_mut(id.0 as usize)?.as_mut()
    }

    fn remove(&mut self, id: ResourceId) -> Option<AnimationResource> {
        let resource = self.slots.get_mut(id.0 as usize)?.take()?;
        self.free.push(id.0);
        Some(resource)
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn iter(&self) -> impl Iterator<Item = (ResourceId, &AnimationResource)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref()
                .map(|resource| (ResourceId(index as u32), resource))
        })
    }

    fn ids(&self) -> Vec<ResourceId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub(crate) fn canvas_for(&self, widget: WidgetId) -> Option<&PixelCanvas> {
        self.iter()
            .find(|(_, resource)| resource.config.widget == widget)
            .and_then(|(_, resource)| resource.canvas())
    }
}

impl UiState {
    pub fn resource(&self, id: ResourceId) -> Option<&AnimationResource> {
        self.resources.get(id)
    }

    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.ids()
    }
}

/// Runtime and widget of launch `launch`, unless that launch is gone or being
/// torn down.
pub(crate) fn live_launch(
    state: &mut UiState,
    id: ResourceId,
    launch: u64,
) -> Option<(&mut Runtime, &mut Widget)> {
    let (resources, widgets) = state.parts_mut();
    let resource = resources.get_mut(id)?;
    let widget = resource.config.widget;
    let runtime = resource
        .runtime
        .as_mut()
        .filter(|runtime| runtime.launch == launch && !runtime.stop.is_requested())?;
    let widget = widgets.get_mut(widget.raw() as usize)?;
    Some((runtime, widget))
}

/// Runtime of launch `launch` even if it is being torn down.
pub(crate) fn launch_runtime(
    state: &mut UiState,
    id: ResourceId,
    launch: u64,
) -> Option<&mut Runtime> {
    state
        .resources
        .get_mut(id)?
        .runtime
        .as_mut()
        .filter(|runtime| runtime.launch == launch)
}

/// Reacts to host lifecycle signals for every animation resource.
pub struct LifecycleController {
    ui: SharedUi,
    allocator: RegionAllocator,
    library: Arc<dyn AnimationLibrary>,
    playback: PlaybackConfig,
    retired: Vec<JoinHandle<()>>,
    // Launch generations are unique across resources, so a task left over
    // from a removed resource cannot match a resource that reuses its slot.
    last_launch: u64,
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("allocator", &self.allocator)
            .field("playback", &self.playback)
            .field("retired_tasks", &self.retired.len())
            .field("last_launch", &self.last_launch)
            .finish_non_exhaustive()
    }
}

impl LifecycleController {
    pub fn new(
        ui: SharedUi,
        allocator: RegionAllocator,
        library: Arc<dyn AnimationLibrary>,
        playback: PlaybackConfig,
    ) -> Self {
        Self {
            ui,
            allocator,
            library,
            playback,
            retired: Vec::new(),
            last_launch: 0,
        }
    }

    pub fn allocator(&self) -> &RegionAllocator {
        &self.allocator
    }

    /// Registers a resource for an existing widget and launches it.
    ///
    /// An invalid configuration is an error and registers nothing. A failed
    /// first launch is reported through [`Created::launched`]; the resource
    /// stays registered with nothing allocated and the next
    /// [`ScreenEvent::Loaded`] retries.
    pub fn create(&mut self, state: &mut UiState, config: ResourceConfig) -> Result<Created> {
        config.validate()?;
        if state.widget(config.widget).is_none() {
            return Err(LottieError::UnknownWidget(config.widget.raw()));
        }

        let id = state.resources.insert(AnimationResource::new(config));
        let launched = match self.launch(state, id) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    resource = %id,
                    %err,
                    retryable = err.is_recoverable(),
                    "initial launch failed, waiting for next load"
                );
                false
            }
        };
        Ok(Created { id, launched })
    }

    /// Stops the render task and hides the widget. Buffers stay allocated
    /// until [`on_post_unload`](Self::on_post_unload).
    pub fn on_pre_unload(&mut self, state: &mut UiState, id: ResourceId) {
        let Some(resource) = state.resources.get_mut(id) else {
            tracing::warn!(resource = %id, "pre-unload for unknown resource");
            return;
        };
        let widget = resource.config.widget;
        if let Some(runtime) = resource.runtime.as_mut() {
            runtime.stop.request();
            if let Some(task) = runtime.task.take() {
                self.retired.push(task);
            }
        }
        if let Some(widget) = state.widget_mut(widget) {
            widget.hide();
        }
        tracing::info!(resource = %id, "render task stopped, widget hidden");
    }

    /// Releases the pixel buffer, task stack and task control block.
    pub fn on_post_unload(&mut self, state: &mut UiState, id: ResourceId) {
        let Some(resource) = state.resources.get_mut(id) else {
            tracing::warn!(resource = %id, "post-unload for unknown resource");
            return;
        };
        let widget = resource.config.widget;
        if let Some(mut runtime) = resource.runtime.take() {
            // Reached without a pre-unload: stop first so the task cannot
            // outlive its launch.
            if let Some(task) = runtime.task.take() {
                runtime.stop.request();
                self.retired.push(task);
            }
            let (pixel_kib, stack_kib, control_bytes) = runtime.footprint();
            drop(runtime);
            if let Some(widget) = state.widget_mut(widget) {
                widget.clear_buffer();
            }
            tracing::info!(
                resource = %id,
                pixel_kib,
                stack_kib,
                control_bytes,
                "animation memory freed"
            );
        }
        self.reap_finished();
    }

    /// Allocates and launches if nothing is allocated yet. Returns whether the
    /// resource ends up allocated.
    pub fn on_loaded(&mut self, state: &mut UiState, id: ResourceId) -> bool {
        match state.resources.get(id) {
            None => {
                tracing::warn!(resource = %id, "load for unknown resource");
                false
            }
            Some(resource) if resource.is_allocated() => true,
            Some(_) => match self.launch(state, id) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(
                        resource = %id,
                        %err,
                        retryable = err.is_recoverable(),
                        "launch failed"
                    );
                    false
                }
            },
        }
    }

    /// Delivers a screen transition to every resource whose widget lives on
    /// `screen`.
    pub fn handle_screen_event(&mut self, state: &mut UiState, screen: ScreenId, event: ScreenEvent) {
        let ids: Vec<ResourceId> = state
            .resources
            .iter()
            .filter(|(_, resource)| {
                state
                    .widget(resource.config.widget)
                    .is_some_and(|widget| widget.screen() == screen)
            })
            .map(|(id, _)| id)
            .collect();

        tracing::debug!(screen = screen.raw(), ?event, resources = ids.len(), "screen event");
        for id in ids {
            match event {
                ScreenEvent::UnloadStart => self.on_pre_unload(state, id),
                ScreenEvent::Unloaded => self.on_post_unload(state, id),
                ScreenEvent::Loaded => {
                    self.on_loaded(state, id);
                }
            }
        }
    }

    /// Tears the resource down and drops it, returning its configuration. Used
    /// when the hosting widget is destroyed.
    pub fn remove(&mut self, state: &mut UiState, id: ResourceId) -> Result<ResourceConfig> {
        if state.resources.get(id).is_none() {
            return Err(LottieError::UnknownResource(id.0));
        }
        self.on_pre_unload(state, id);
        self.on_post_unload(state, id);
        let resource = state
            .resources
            .remove(id)
            .ok_or(LottieError::UnknownResource(id.0))?;
        tracing::debug!(resource = %id, slots = state.resources.capacity(), "resource removed");
        Ok(resource.config)
    }

    /// Joins retired task threads that have already exited. Never blocks.
    pub fn reap_finished(&mut self) -> usize {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retired)
            .into_iter()
            .partition(|task| task.is_finished());
        self.retired = running;
        let reaped = finished.len();
        for task in finished {
            if task.join().is_err() {
                tracing::warn!("render task panicked");
            }
        }
        reaped
    }

    /// Number of stopped tasks whose threads have not been joined yet.
    pub fn retired_tasks(&self) -> usize {
        self.retired.len()
    }

    /// Waits for every retired task thread to exit.
    ///
    /// Must not be called with the UI lock held: a retired task may be blocked
    /// on it.
    pub fn join_retired(&mut self) {
        for task in self.retired.drain(..) {
            if task.join().is_err() {
                tracing::warn!("render task panicked");
            }
        }
    }

    /// Stops and frees every resource, then joins all task threads.
    pub fn shutdown(&mut self) -> Result<()> {
        let ui = self.ui.clone();
        {
            let mut state = ui.lock()?;
            for id in state.resources.ids() {
                self.on_pre_unload(&mut state, id);
                self.on_post_unload(&mut state, id);
            }
        }
        self.join_retired();
        Ok(())
    }

    fn launch(&mut self, state: &mut UiState, id: ResourceId) -> Result<()> {
        let resource = state
            .resources
            .get_mut(id)
            .ok_or(LottieError::UnknownResource(id.0))?;
        if resource.runtime.is_some() {
            return Ok(());
        }
        resource.launches += 1;
        self.last_launch += 1;
        let launch = self.last_launch;
        let config = resource.config.clone();

        let widget = state.try_widget_mut(config.widget)?;
        widget.set_buffer(config.width, config.height);
        widget.hide();

        match self.allocate_and_spawn(id, launch, &config) {
            Ok(runtime) => {
                let (_, stack_kib, _) = runtime.footprint();
                if let Some(resource) = state.resources.get_mut(id) {
                    resource.runtime = Some(runtime);
                }
                tracing::info!(
                    resource = %id,
                    launch,
                    width = config.width,
                    height = config.height,
                    stack_kib,
                    "render task launched"
                );
                Ok(())
            }
            Err(err) => {
                if let Some(widget) = state.widget_mut(config.widget) {
                    widget.clear_buffer();
                }
                tracing::error!(resource = %id, %err, "launch rolled back");
                Err(err)
            }
        }
    }

    /// Anything allocated before a failing step is dropped on the early
    /// return, which hands it back to its region.
    fn allocate_and_spawn(
        &self,
        id: ResourceId,
        launch: u64,
        config: &ResourceConfig,
    ) -> Result<Runtime> {
        let pixels = self.allocator.allocate(
            MemoryRegion::Bulk,
            config.pixel_buffer_len()?,
            PIXEL_ALIGNMENT,
        )?;
        let task_stack = self.allocator.allocate(
            MemoryRegion::Bulk,
            self.playback.task_stack_size,
            STACK_ALIGNMENT,
        )?;
        let task_control = self.allocator.allocate(
            MemoryRegion::Fast,
            TASK_CONTROL_BLOCK_SIZE,
            CONTROL_BLOCK_ALIGNMENT,
        )?;

        let (stop, listener) = stop_channel();
        let task = RenderTask {
            ui: self.ui.clone(),
            library: Arc::clone(&self.library),
            resource: id,
            launch,
            source: config.source.clone(),
            looping: config.looping,
            auto_start: config.auto_start,
            playback: self.playback.clone(),
            stop: listener,
        }
        .spawn()?;

        Ok(Runtime {
            launch,
            canvas: PixelCanvas::new(config.width, config.height, pixels),
            task_stack,
            task_control,
            task: Some(task),
            stop,
            task_state: TaskState::Starting,
        })
    }
}
