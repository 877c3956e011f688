use log::*;
use pollster::FutureExt;
use std::sync::Arc;
use wgpu::{Features, Limits};
use winit::window::Window;

/// The device context contains public information regarding the current [`wgpu`]
/// instance, including the device, queue, adapter, etc. It is shared between the
/// renderer and the profiler via an [`Arc`].
pub struct DeviceContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
}

impl DeviceContext {
    /// Creates a new [`wgpu`] instance and initializes a whole device context based
    /// from that, with the window's surface configured and ready to present.
    ///
    /// Timestamp queries are requested when the adapter offers them; without them the
    /// profiler falls back to CPU timings only.
    pub fn create(window: &Window) -> (Arc<Self>, wgpu::Surface, wgpu::SurfaceConfiguration) {
        info!("Creating a device context...");

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = unsafe {
            instance
                .create_surface(&window)
                .expect("couldn't create the surface")
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            })
            .block_on()
            .expect("couldn't find a GPU");

        info!("Using adapter: {}", adapter.get_info().name);
        info!("Using backend: {:?}", adapter.get_info().backend);

        let mut features = Features::empty();
        if adapter.features().contains(Features::TIMESTAMP_QUERY) {
            features |= Features::TIMESTAMP_QUERY;
        } else {
            warn!("The adapter doesn't support timestamp queries");
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    features,
                    limits: Limits::default(),
                },
                None,
            )
            .block_on()
            .expect("couldn't initialize the device");

        device.on_uncaptured_error(Box::new(|error| {
            error!("An error has been reported by wgpu!");
            error!("{error}");
            panic!("Graphics API error: {error}");
        }));

        let sconfig = surface
            .get_default_config(
                &adapter,
                window.inner_size().width,
                window.inner_size().height,
            )
            .expect("surface unsupported by adapter");

        surface.configure(&device, &sconfig);

        let result = Arc::new(Self {
            device,
            queue,
            instance,
            adapter,
        });

        (result, surface, sconfig)
    }
}
