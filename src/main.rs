//! camctl
//!
//! Command-line tool to list, configure and grab from cameras, and to
//! explore sensor timing offline.

use camio::{
    adapter::{AdapterRegistry, AptinaAdapter, CameraHandle, DummyAdapter, PylonAdapter},
    capture::{Camera, FileConfig, Frame, TriggerMode},
    metrics::{MetricsRegistry, MetricsSnapshot},
    timing::{SensorGeometry, TimingModel},
    transport::{SimulatedBus, SimulatedNodeBus},
};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_EXPOSURE_MS: f64 = 5.0;
const DEFAULT_FRAME_RATE_HZ: f64 = 20.0;

#[derive(Parser, Debug)]
#[command(name = "camctl", version, about = "Camera control tool", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print library and adapter versions
    Version,
    /// List attached cameras
    List,
    /// Grab frames from a camera
    Grab {
        /// Camera index as printed by `list`; the configured camera if omitted
        index: Option<usize>,
        /// Stop after this many frames (runs until Ctrl-C if omitted)
        #[arg(short = 'n', long)]
        count: Option<u64>,
        /// Exposure in milliseconds
        #[arg(short, long)]
        exposure: Option<f64>,
        /// Frame rate in Hz (timer trigger only)
        #[arg(short, long)]
        rate: Option<f64>,
        /// Trigger mode: software, timer or external
        #[arg(short, long)]
        trigger: Option<TriggerMode>,
        /// Write every frame as a PGM image into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print Prometheus metrics when done
        #[arg(long)]
        print_metrics: bool,
    },
    /// Compute blanking and exposure registers for a sensor
    Timing {
        /// Pixel clock in Hz
        #[arg(long, default_value_t = 96_000_000.0)]
        clock: f64,
        /// Active image width
        #[arg(long, default_value_t = 1280)]
        width: u32,
        /// Active image height
        #[arg(long, default_value_t = 1024)]
        height: u32,
        /// Requested frame rate in Hz
        #[arg(long)]
        rate: f64,
        /// Exposure in milliseconds to split into shutter widths
        #[arg(long)]
        exposure: Option<f64>,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => FileConfig::default(),
    };

    if let Err(e) = run(cli.command, &config) {
        eprintln!("camctl: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Command, config: &FileConfig) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Version => {
            for version in build_registry(config).versions() {
                println!("{}", version);
            }
        }
        Command::List => list(&mut build_registry(config))?,
        Command::Grab {
            index,
            count,
            exposure,
            rate,
            trigger,
            output,
            print_metrics,
        } => {
            let mut registry = build_registry(config);
            let (handle, mut camera) = open_camera(&mut registry, config, index)?;

            let settings = GrabSettings {
                trigger: trigger.unwrap_or(config.camera.trigger),
                exposure_ms: exposure
                    .or(config.camera.exposure_ms)
                    .unwrap_or(DEFAULT_EXPOSURE_MS),
                frame_rate_hz: rate
                    .or(config.camera.frame_rate_hz)
                    .unwrap_or(DEFAULT_FRAME_RATE_HZ),
            };
            configure(camera.as_mut(), &settings);

            let metrics = MetricsRegistry::new()?;
            grab_loop(
                camera.as_mut(),
                &handle,
                count,
                output.as_deref(),
                &metrics,
                config.metrics.port,
            )?;

            if print_metrics {
                print!("{}", metrics.encode()?);
            }
        }
        Command::Timing {
            clock,
            width,
            height,
            rate,
            exposure,
        } => timing(config, clock, width, height, rate, exposure)?,
    }
    Ok(())
}

/// Registers every adapter this build knows about.
fn build_registry(config: &FileConfig) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Box::new(DummyAdapter::new()));
    registry.register(Box::new(AptinaAdapter::new(
        SimulatedBus::single(),
        config.sensor.clone(),
        config.registers.retry_policy(),
    )));
    registry.register(Box::new(PylonAdapter::new(SimulatedNodeBus::single())));
    registry
}

fn list(registry: &mut AdapterRegistry) -> Result<(), Box<dyn Error>> {
    let handles = registry.enumerate()?;

    println!("Found {} device(s):", handles.len());
    for (index, handle) in handles.iter().enumerate() {
        println!(
            "{:>2} - {} ({}) [{}]",
            index, handle.info.name, handle.info.id, handle.adapter
        );
        if !handle.info.description.is_empty() {
            println!("     {}", handle.info.description);
        }
    }
    Ok(())
}

fn open_camera(
    registry: &mut AdapterRegistry,
    config: &FileConfig,
    index: Option<usize>,
) -> Result<(CameraHandle, Box<dyn Camera>), Box<dyn Error>> {
    let handles = registry.enumerate()?;

    let handle = match index {
        Some(index) => handles
            .get(index)
            .ok_or_else(|| format!("unknown device index {}", index))?,
        None => handles
            .iter()
            .filter(|h| h.adapter == config.camera.adapter)
            .find(|h| config.camera.id.as_ref().map_or(true, |id| *id == h.info.id))
            .ok_or_else(|| format!("no {} camera found", config.camera.adapter))?,
    };

    info!(
        adapter = %handle.adapter,
        id = %handle.info.id,
        name = %handle.info.name,
        "Opening camera"
    );
    let camera = registry.open_handle(handle)?;
    Ok((handle.clone(), camera))
}

struct GrabSettings {
    trigger: TriggerMode,
    exposure_ms: f64,
    frame_rate_hz: f64,
}

/// Applies trigger, exposure and frame rate. Settings a camera cannot
/// honor are reported and skipped.
fn configure(camera: &mut dyn Camera, settings: &GrabSettings) {
    if let Err(e) = camera.set_trigger(settings.trigger) {
        warn!(trigger = %settings.trigger, error = %e, "Failed to set trigger mode");
    }
    if let Err(e) = camera.set_exposure(settings.exposure_ms) {
        warn!(exposure_ms = settings.exposure_ms, error = %e, "Failed to set exposure");
    }
    if camera.trigger() == TriggerMode::Timer {
        if let Err(e) = camera.set_frame_rate(settings.frame_rate_hz) {
            warn!(hz = settings.frame_rate_hz, error = %e, "Failed to set frame rate");
        }
    }

    match MetricsSnapshot::from_camera(camera) {
        Ok(snapshot) => info!(
            trigger = %camera.trigger(),
            exposure_ms = snapshot.exposure_ms,
            frame_rate_hz = snapshot.frame_rate_hz,
            size = %camera.frame_size(),
            "Camera configured"
        ),
        Err(e) => warn!(error = %e, "Failed to read back settings"),
    }
}

fn grab_loop(
    camera: &mut dyn Camera,
    handle: &CameraHandle,
    count: Option<u64>,
    output: Option<&Path>,
    metrics: &MetricsRegistry,
    metrics_port: u16,
) -> Result<(), Box<dyn Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let exporter = MetricsExporter::start(metrics_port, handle)?;

    if let Some(dir) = output {
        std::fs::create_dir_all(dir)?;
    }

    capture(camera, &running, count, output, metrics, &exporter)?;

    let stats = camera.stats();
    info!(
        frames = stats.frames_grabbed,
        failures = stats.grab_failures,
        register_retries = stats.register_retries,
        "Done"
    );
    Ok(())
}

/// Streams frames until `running` clears or `count` frames arrive. The
/// camera is stopped on every exit path.
fn capture(
    camera: &mut dyn Camera,
    running: &AtomicBool,
    count: Option<u64>,
    output: Option<&Path>,
    metrics: &MetricsRegistry,
    exporter: &MetricsExporter,
) -> Result<(), Box<dyn Error>> {
    camera.start()?;
    info!("Grabbing frames, press Ctrl-C to stop");

    let result = grab_frames(camera, running, count, output, metrics, exporter);
    let stopped = camera.stop();
    result?;
    stopped?;
    Ok(())
}

fn grab_frames(
    camera: &mut dyn Camera,
    running: &AtomicBool,
    count: Option<u64>,
    output: Option<&Path>,
    metrics: &MetricsRegistry,
    exporter: &MetricsExporter,
) -> Result<(), Box<dyn Error>> {
    let mut grabbed = 0u64;
    while running.load(Ordering::SeqCst) && count.map_or(true, |n| grabbed < n) {
        match camera.grab() {
            Ok(frame) => {
                grabbed += 1;
                info!(sequence = frame.sequence(), mean = mean_intensity(&frame), "Frame");

                if let Some(dir) = output {
                    let path = write_pgm(dir, &frame)?;
                    info!(path = %path.display(), "Frame written");
                }
            }
            Err(e) => warn!(error = %e, "Grab failed"),
        }

        let snapshot = MetricsSnapshot::from_camera(camera)?;
        metrics.update(&snapshot);
        exporter.update(&snapshot);
    }
    Ok(())
}

fn mean_intensity(frame: &Frame) -> f64 {
    let pixels = frame.pixels();
    if pixels.is_empty() {
        return 0.0;
    }
    pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / pixels.len() as f64
}

/// Writes a frame as binary PGM named after the capture time.
fn write_pgm(dir: &Path, frame: &Frame) -> std::io::Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%dT%H%M%S%.3f");
    let path = dir.join(format!("frame_{}_{:06}.pgm", stamp, frame.sequence()));

    let mut out = BufWriter::new(File::create(&path)?);
    write!(out, "P5\n{} {}\n255\n", frame.width(), frame.height())?;
    out.write_all(frame.pixels())?;
    out.flush()?;
    Ok(path)
}

fn timing(
    config: &FileConfig,
    clock: f64,
    width: u32,
    height: u32,
    rate: f64,
    exposure: Option<f64>,
) -> Result<(), Box<dyn Error>> {
    let model = TimingModel::new(
        clock,
        SensorGeometry::new(width, height)?,
        config.sensor.bounds(),
    )?;
    let solution = model.solve_blanking(rate)?;
    let frame_pixels = model.frame_pixels(solution.blanking);

    println!("pixel budget:      {}", solution.target_pixels);
    println!("horizontal blank:  {}", solution.blanking.horizontal);
    println!("vertical blank:    {}", solution.blanking.vertical);
    println!("achieved pixels:   {} (error {})", solution.achieved_pixels, solution.error);
    println!("candidates:        {}", solution.candidates);
    println!("frame rate:        {:.4} Hz", clock / frame_pixels as f64);

    if let Some(ms) = exposure {
        let pixels = model.exposure_pixels(ms)?;
        let split = model.split_exposure(pixels, solution.blanking.horizontal)?;
        let combined = model.combine_exposure(split, solution.blanking.horizontal, false);
        let with_overhead = model.combine_exposure(split, solution.blanking.horizontal, true);

        println!("exposure pixels:   {}", pixels);
        println!("coarse width:      {}", split.coarse);
        println!("fine width:        {}", split.fine);
        println!("exposure:          {:.6} ms", model.exposure_ms(combined));
        println!(
            "achievable rate:   {:.4} Hz",
            model.frame_rate_hz(frame_pixels, with_overhead)
        );
        if model.exposure_exceeds_frame(pixels, rate) {
            warn!(exposure_ms = ms, hz = rate, "Exposure too long to support frame rate");
        }
    }
    Ok(())
}

/// HTTP exporter running on a background thread.
#[cfg(feature = "metrics")]
struct MetricsExporter {
    state: Option<Arc<tokio::sync::RwLock<camio::metrics::MetricsState>>>,
}

#[cfg(feature = "metrics")]
impl MetricsExporter {
    fn start(port: u16, camera: &CameraHandle) -> Result<Self, Box<dyn Error>> {
        use camio::metrics::{MetricsServer, MetricsServerConfig};

        if port == 0 {
            return Ok(Self { state: None });
        }

        let server = MetricsServer::new(
            MetricsServerConfig::with_port(port),
            MetricsRegistry::new()?,
        );
        let state = server.state();
        state.blocking_write().attach(camera.clone());
        let runtime = tokio::runtime::Runtime::new()?;

        std::thread::spawn(move || {
            if let Err(e) = runtime.block_on(server.run()) {
                warn!(error = %e, "Metrics server stopped");
            }
        });

        Ok(Self { state: Some(state) })
    }

    fn update(&self, snapshot: &MetricsSnapshot) {
        if let Some(state) = &self.state {
            state.blocking_write().update(snapshot);
        }
    }
}

#[cfg(not(feature = "metrics"))]
struct MetricsExporter;

#[cfg(not(feature = "metrics"))]
impl MetricsExporter {
    fn start(port: u16, _camera: &CameraHandle) -> Result<Self, Box<dyn Error>> {
        if port != 0 {
            warn!(port, "Built without the metrics feature; exporter disabled");
        }
        Ok(Self)
    }

    fn update(&self, _snapshot: &MetricsSnapshot) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use camio::capture::DummyCamera;

    fn dummy_handle() -> CameraHandle {
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(DummyAdapter::new()));
        registry.enumerate().unwrap().remove(0)
    }

    #[test]
    fn test_capture_counts_frames_and_stops() {
        let mut camera = DummyCamera::new();
        let metrics = MetricsRegistry::new().unwrap();
        let exporter = MetricsExporter::start(0, &dummy_handle()).unwrap();
        let running = AtomicBool::new(true);

        capture(&mut camera, &running, Some(3), None, &metrics, &exporter).unwrap();

        assert!(!camera.is_streaming());
        assert_eq!(camera.stats().frames_grabbed, 3);
        assert!(metrics.encode().unwrap().contains("camio_frames_grabbed_total 3"));
    }

    #[test]
    fn test_capture_stops_camera_when_write_fails() {
        let mut camera = DummyCamera::new();
        let metrics = MetricsRegistry::new().unwrap();
        let exporter = MetricsExporter::start(0, &dummy_handle()).unwrap();
        let running = AtomicBool::new(true);
        let missing = std::env::temp_dir()
            .join(format!("camctl-missing-{}", std::process::id()))
            .join("frames");

        let result = capture(
            &mut camera,
            &running,
            Some(3),
            Some(&missing),
            &metrics,
            &exporter,
        );

        assert!(result.is_err());
        assert!(!camera.is_streaming());
        assert_eq!(camera.stats().frames_grabbed, 1);
    }

    #[test]
    fn test_capture_honors_stop_flag() {
        let mut camera = DummyCamera::new();
        let metrics = MetricsRegistry::new().unwrap();
        let exporter = MetricsExporter::start(0, &dummy_handle()).unwrap();
        let running = AtomicBool::new(false);

        capture(&mut camera, &running, None, None, &metrics, &exporter).unwrap();

        assert!(!camera.is_streaming());
        assert_eq!(camera.stats().frames_grabbed, 0);
    }
}
