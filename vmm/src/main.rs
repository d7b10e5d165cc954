// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! fbdev-display: runs the framebuffer backend against a test pattern
//! guest display.

use std::error::Error as _;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{LevelFilter, error, info};
use thiserror::Error;
use vmm::display::event_loop;
use vmm::display::{
    DisplayChangeListener, DisplayOptions, DisplayRegistry, DisplaySurface, DisplayType, FilterMode, GuestDisplay,
    ListenerId,
};
use vmm::input::EventQueue;

#[derive(Debug, Error)]
enum Error {
    #[error("Failed to read configuration file {}", .1.display())]
    ReadConfig(#[source] io::Error, PathBuf),
    #[error("Invalid configuration file")]
    ParseConfig(#[source] serde_json::Error),
    #[error("Failed to serialize display options")]
    SerializeConfig(#[source] serde_json::Error),
    #[error("Invalid option --{0}: {1}")]
    InvalidOption(&'static str, String),
    #[error("Display type {0} is not available")]
    UnknownDisplay(DisplayType),
    #[error("Failed to register termination signal {1}")]
    Signal(#[source] io::Error, i32),
    #[error(transparent)]
    Display(#[from] vmm::display::Error),
}

/// Guest display showing a moving color bar over a gradient.
struct PatternGuest {
    surface: DisplaySurface,
    frame: u32,
    switched: bool,
    console: usize,
    listeners: Vec<(ListenerId, String)>,
    next_listener: u64,
}

impl PatternGuest {
    const BAR_WIDTH: u32 = 16;

    fn new(width: u32, height: u32) -> Self {
        let mut surface = DisplaySurface::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let r = x * 255 / width.max(1);
                let g = y * 255 / height.max(1);
                surface.pixels[(y * width + x) as usize] = r << 16 | g << 8 | 0x40;
            }
        }
        Self {
            surface,
            frame: 0,
            switched: false,
            console: 0,
            listeners: Vec::new(),
            next_listener: 1,
        }
    }

    fn bar_x(&self) -> u32 {
        self.frame.wrapping_mul(4) % self.surface.width.max(1)
    }

    fn paint_bar(&mut self, color: u32) -> (i32, i32, i32, i32) {
        let (width, height) = (self.surface.width, self.surface.height);
        let x0 = self.bar_x();
        let x1 = (x0 + Self::BAR_WIDTH).min(width);
        for y in 0..height {
            for x in x0..x1 {
                self.surface.pixels[(y * width + x) as usize] = color;
            }
        }
        (x0 as i32, 0, (x1 - x0) as i32, height as i32)
    }
}

impl GuestDisplay for PatternGuest {
    fn update(&mut self, listener: &mut dyn DisplayChangeListener) {
        if !self.switched {
            self.switched = true;
            listener.gfx_switch(&self.surface);
            listener.gfx_update(0, 0, self.surface.width as i32, self.surface.height as i32);
        }
        let (x, y, w, h) = self.paint_bar(0);
        listener.gfx_update(x, y, w, h);
        self.frame = self.frame.wrapping_add(1);
        let (x, y, w, h) = self.paint_bar(0x00ff_ffff);
        listener.gfx_update(x, y, w, h);
    }

    fn surface(&self) -> Option<&DisplaySurface> {
        Some(&self.surface)
    }

    fn is_graphic(&self) -> bool {
        self.console == 0
    }

    fn select_console(&mut self, index: usize) {
        info!("Guest console {index} selected");
        self.console = index;
    }

    fn register_listener(&mut self, name: &str) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, name.to_string()));
        id
    }

    fn unregister_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(l, _)| *l != id);
    }
}

fn command() -> Command {
    Command::new("fbdev-display")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Linux framebuffer display backend demo")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON display options, overridden by the flags below"),
        )
        .arg(
            Arg::new("device")
                .short('d')
                .long("device")
                .value_name("PATH")
                .help("Framebuffer device (default: $FRAMEBUFFER or /dev/fb0)"),
        )
        .arg(
            Arg::new("scale")
                .short('s')
                .long("scale")
                .action(ArgAction::SetTrue)
                .help("Scale the guest display to the screen"),
        )
        .arg(
            Arg::new("filter")
                .long("filter")
                .value_name("MODE")
                .help("Scaling filter: fast, good or best"),
        )
        .arg(
            Arg::new("mouse")
                .long("mouse")
                .value_name("PATH")
                .help("Mouse device"),
        )
        .arg(
            Arg::new("refresh-ms")
                .long("refresh-ms")
                .value_name("MS")
                .help("Screen refresh interval in milliseconds"),
        )
        .arg(
            Arg::new("size")
                .long("size")
                .value_name("WxH")
                .default_value("640x480")
                .help("Size of the test pattern"),
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .action(ArgAction::SetTrue)
                .help("Print the effective options as JSON and exit"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
}

fn display_options(matches: &ArgMatches) -> Result<DisplayOptions, Error> {
    let mut options = match matches.get_one::<String>("config") {
        Some(path) => {
            let path = PathBuf::from(path);
            let data = fs::read_to_string(&path).map_err(|e| Error::ReadConfig(e, path))?;
            serde_json::from_str(&data).map_err(Error::ParseConfig)?
        }
        None => DisplayOptions::default(),
    };

    if let Some(device) = matches.get_one::<String>("device") {
        options.device = Some(PathBuf::from(device));
    }
    if matches.get_flag("scale") {
        options.scale = true;
    }
    if let Some(filter) = matches.get_one::<String>("filter") {
        options.filter = filter
            .parse::<FilterMode>()
            .map_err(|e| Error::InvalidOption("filter", e))?;
    }
    if let Some(mouse) = matches.get_one::<String>("mouse") {
        options.mouse_device = PathBuf::from(mouse);
    }
    if let Some(ms) = matches.get_one::<String>("refresh-ms") {
        options.refresh_interval_ms = ms
            .parse()
            .map_err(|e: std::num::ParseIntError| Error::InvalidOption("refresh-ms", e.to_string()))?;
    }
    Ok(options)
}

fn pattern_size(matches: &ArgMatches) -> Result<(u32, u32), Error> {
    let size = matches
        .get_one::<String>("size")
        .map(String::as_str)
        .unwrap_or("640x480");
    let invalid = || Error::InvalidOption("size", size.to_string());
    let (w, h) = size.split_once('x').ok_or_else(invalid)?;
    let w = w.parse::<u32>().map_err(|_| invalid())?;
    let h = h.parse::<u32>().map_err(|_| invalid())?;
    if w == 0 || h == 0 {
        return Err(invalid());
    }
    Ok((w, h))
}

fn run(matches: &ArgMatches) -> Result<(), Error> {
    let options = display_options(matches)?;
    if matches.get_flag("print-config") {
        match serde_json::to_string_pretty(&options) {
            Ok(json) => println!("{json}"),
            Err(e) => return Err(Error::SerializeConfig(e)),
        }
        return Ok(());
    }
    let (width, height) = pattern_size(matches)?;

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, stop.clone()).map_err(|e| Error::Signal(e, signal))?;
    }

    let registry = DisplayRegistry::default();
    let mut backend = registry
        .create(DisplayType::Fbdev, &options)
        .ok_or(Error::UnknownDisplay(DisplayType::Fbdev))?;

    let mut guest = PatternGuest::new(width, height);
    let mut input = EventQueue::default();
    backend.init(&mut guest)?;
    info!("Display running, press Ctrl+C to stop");

    event_loop::run(backend.as_mut(), &mut guest, &mut input, &stop)?;

    let stats = input.stats();
    info!(
        "Display stopped: {} input events, {} dropped",
        stats.events_queued, stats.events_dropped
    );
    Ok(())
}

fn main() {
    let matches = command().get_matches();

    let level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(e) = run(&matches) {
        error!("{e}");
        let mut source = e.source();
        while let Some(cause) = source {
            error!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}
