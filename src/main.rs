//! Demo host for the LTX recorder.
//!
//! Records three short synthetic trials into the configured output directory:
//! a tetrode trial, a downsampled continuous trial and a position tracking trial.
//! The position trial also feeds a display ring buffer drained by a render thread.

use chrono::Local;
use ltx_recorder::{
    AcquisitionControl, ChannelGains, Config, ContinuousChannelInfo, DisplayRingBuffer, PosPoint,
    RecordError, RecordingLayout, RecordingSession, SharedHeaderSettings, Spike,
    SpikeChannelInfo,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ACQ_RATE: f32 = 30_000.0;
const POS_RATE: f32 = 50.0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Using default settings: {}", e);
            Config::default()
        }
    };

    let header_settings = Arc::new(SharedHeaderSettings::from(&config));
    let control = AcquisitionControl::new();
    let updates = control.subscribe();

    let root = config
        .output_dir
        .join(Local::now().format("%Y-%m-%d_%H-%M-%S").to_string());
    std::fs::create_dir_all(&config.output_dir)?;
    log::info!("Writing trials to {}", config.output_dir.display());

    let new_session = || RecordingSession::new(config.clone(), header_settings.clone(), control.clone());

    record_spike_trial(new_session(), &root)?;
    // Second continuous channel recorded at double gain
    let gains = Arc::new(ChannelGains::new(2));
    gains.set(1, 2.0);
    record_continuous_trial(new_session().with_channel_gains(gains), &root)?;
    record_position_trial(new_session(), &root, &config.position_stream_name)?;

    for update in updates.try_iter() {
        log::debug!("Recorder update: {:?}", update);
    }
    Ok(())
}

fn record_spike_trial(mut session: RecordingSession, root: &Path) -> Result<(), RecordError> {
    let layout = RecordingLayout {
        spike_channels: (1..=2)
            .map(|i| SpikeChannelInfo::tetrode(format!("Tetrode {}", i), ACQ_RATE, 0.195))
            .collect(),
        continuous_channels: vec![ContinuousChannelInfo::new("CH1", "acquisition", ACQ_RATE, 0.195)],
    };
    session.open_files(root, 1, 0, layout)?;
    session.write_timestamp_sync_text(1, 0, ACQ_RATE, "Software time: 0@30000Hz")?;

    let mut waveform = vec![0.0f32; 4 * 40];
    for n in 0..40 {
        for ch in 0..4 {
            for s in 0..40 {
                let phase = s as f32 / 40.0 * std::f32::consts::TAU;
                waveform[ch * 40 + s] = -60.0 * (ch + 1) as f32 * phase.sin() * (n % 5 + 1) as f32 / 5.0;
            }
        }
        let spike = Spike {
            timestamp_seconds: n as f64 * 0.025,
            num_channels: 4,
            samples_per_channel: 40,
            data: &waveform,
        };
        session.write_spike(n % 2, &spike)?;
    }
    session.close_files()
}

fn record_continuous_trial(mut session: RecordingSession, root: &Path) -> Result<(), RecordError> {
    let layout = RecordingLayout {
        spike_channels: Vec::new(),
        continuous_channels: (1..=2)
            .map(|i| ContinuousChannelInfo::new(format!("CH{}", i), "acquisition", ACQ_RATE, 0.195))
            .collect(),
    };
    session.open_files(root, 1, 1, layout)?;
    session.write_timestamp_sync_text(1, 0, ACQ_RATE, "Software time: 0@30000Hz")?;

    // Two seconds of 8 Hz theta in 1024-sample blocks
    let total = 2 * ACQ_RATE as usize;
    let mut block = Vec::with_capacity(1024);
    let mut times = Vec::with_capacity(1024);
    let mut start = 0;
    while start < total {
        let end = (start + 1024).min(total);
        block.clear();
        times.clear();
        for i in start..end {
            let t = i as f64 / f64::from(ACQ_RATE);
            block.push((100.0 * (std::f64::consts::TAU * 8.0 * t).sin()) as f32);
            times.push(t);
        }
        session.write_continuous_data(0, 0, &block, &times)?;
        session.write_continuous_data(1, 1, &block, &times)?;
        start = end;
    }
    session.close_files()
}

fn record_position_trial(
    mut session: RecordingSession,
    root: &Path,
    stream_name: &str,
) -> Result<(), RecordError> {
    let layout = RecordingLayout {
        spike_channels: Vec::new(),
        continuous_channels: ["t", "x1", "y1", "x2", "y2", "numpix1", "numpix2"]
            .iter()
            .map(|name| ContinuousChannelInfo::new(*name, stream_name, POS_RATE, 1.0))
            .collect(),
    };
    session.open_files(root, 1, 2, layout)?;

    let (mut display, mut render) = DisplayRingBuffer::<PosPoint>::new(4096, 256);
    let running = Arc::new(AtomicBool::new(true));
    let render_running = running.clone();
    let render_thread = thread::spawn(move || {
        let mut points = Vec::new();
        let mut passes = 0usize;
        while render_running.load(Ordering::Acquire) {
            points.clear();
            render.drain_into(&mut points);
            passes += 1;
            thread::sleep(Duration::from_millis(5));
        }
        points.clear();
        let shown = render.drain_into(&mut points);
        log::info!("Render thread finished after {} passes, last pass {} points", passes, shown);
    });

    // 10 batches of 25 samples, circling the arena
    let batch = 25;
    for b in 0..10 {
        let mut channels = vec![Vec::with_capacity(batch); 7];
        for i in 0..batch {
            let n = b * batch + i;
            let t = n as f32 / POS_RATE;
            let angle = t * 0.5;
            channels[0].push(t);
            channels[1].push(350.0 + 200.0 * angle.cos());
            channels[2].push(350.0 + 200.0 * angle.sin());
            channels[3].push(f32::NAN);
            channels[4].push(f32::NAN);
            channels[5].push(120.0);
            channels[6].push(0.0);
        }
        for (ch, samples) in channels.iter().enumerate() {
            let times: Vec<f64> = channels[0].iter().map(|&t| f64::from(t)).collect();
            session.write_continuous_data(ch, ch, samples, &times)?;
        }
        display.push_positions(&channels[1], &channels[2]);
    }

    let result = session.close_files();
    running.store(false, Ordering::Release);
    if render_thread.join().is_err() {
        log::error!("Render thread panicked");
    }
    result
}
