use anyhow::{anyhow, Context as AnyhowContext, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::runtime::PacingPolicy;

/// Adapter facts worth logging once per run.
#[derive(Debug, Clone)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
    pub max_texture_dimension: u32,
}

impl AdapterProfile {
    fn from_wgpu(info: &wgpu::AdapterInfo, limits: &wgpu::Limits) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
            max_texture_dimension: limits.max_texture_dimension_2d,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self.device_type, wgpu::DeviceType::Cpu)
    }
}

pub(crate) struct SurfaceState {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

/// Instance, device and queue, plus the window surface when there is one.
pub struct GpuContext {
    _instance: wgpu::Instance,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) surface: Option<SurfaceState>,
    adapter_profile: AdapterProfile,
}

impl GpuContext {
    /// Context presenting to `target`. The caller keeps `target` alive for as
    /// long as the context exists.
    pub fn windowed<T>(target: &T, size: (u32, u32), pacing: PacingPolicy) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = create_instance();

        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow!("failed to acquire window handle: {err}"))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow!("failed to acquire display handle: {err}"))?;

        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .context("failed to create rendering surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;
        let (device, queue, adapter_profile) = open_device(&adapter)?;

        let width = size.0.max(1);
        let height = size.1.max(1);
        if width > adapter_profile.max_texture_dimension
            || height > adapter_profile.max_texture_dimension
        {
            anyhow::bail!(
                "GPU max texture dimension is {max}, requested surface is {width}x{height}",
                max = adapter_profile.max_texture_dimension,
            );
        }

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no supported formats")?;
        let present_mode = select_present_mode(&caps, pacing);
        tracing::debug!(?present_mode, ?pacing, ?format, "using present mode");

        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            _instance: instance,
            device,
            queue,
            surface: Some(SurfaceState { surface, config }),
            adapter_profile,
        })
    }

    /// Context without a surface, for probes and offscreen runs.
    pub fn headless() -> Result<Self> {
        let instance = create_instance();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;
        let (device, queue, adapter_profile) = open_device(&adapter)?;
        Ok(Self {
            _instance: instance,
            device,
            queue,
            surface: None,
            adapter_profile,
        })
    }

    pub fn adapter_profile(&self) -> &AdapterProfile {
        &self.adapter_profile
    }

    pub(crate) fn surface_format(&self) -> Option<wgpu::TextureFormat> {
        self.surface.as_ref().map(|state| state.config.format)
    }

    /// Reconfigures the surface. Zero-sized requests (minimized windows) are
    /// ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if let Some(state) = self.surface.as_mut() {
            state.config.width = width;
            state.config.height = height;
            state.surface.configure(&self.device, &state.config);
        }
    }

    pub(crate) fn reconfigure(&self) {
        if let Some(state) = self.surface.as_ref() {
            state.surface.configure(&self.device, &state.config);
        }
    }
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

fn open_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue, AdapterProfile)> {
    let info = adapter.get_info();
    let limits = adapter.limits();
    let profile = AdapterProfile::from_wgpu(&info, &limits);
    tracing::debug!(
        name = %profile.name,
        backend = ?profile.backend,
        device_type = ?profile.device_type,
        is_software = profile.is_software(),
        "selected GPU adapter"
    );

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("computedemo device"),
        required_features: wgpu::Features::empty(),
        required_limits: limits,
        memory_hints: wgpu::MemoryHints::Performance,
        trace: wgpu::Trace::default(),
    }))
    .context("failed to create GPU device")?;

    Ok((device, queue, profile))
}

/// Vsync presents in FIFO order; every other policy prefers a non-blocking
/// mode and falls back to FIFO, which every surface supports.
fn select_present_mode(
    caps: &wgpu::SurfaceCapabilities,
    pacing: PacingPolicy,
) -> wgpu::PresentMode {
    let supports = |mode: wgpu::PresentMode| caps.present_modes.contains(&mode);
    if pacing.blocks_on_present() {
        return wgpu::PresentMode::Fifo;
    }
    [wgpu::PresentMode::Immediate, wgpu::PresentMode::Mailbox]
        .into_iter()
        .find(|mode| supports(*mode))
        .unwrap_or(wgpu::PresentMode::Fifo)
}
