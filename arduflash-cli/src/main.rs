//! arduflash CLI - Command-line tools for the Arduboy Caterina bootloader.
//!
//! ## Features
//!
//! - EEPROM backup, restore, and erase
//! - Sketch backup, erase, and Intel-HEX upload
//! - Flash cart backup and write
//! - Flashcart image building from a CSV index
//! - Sprite sheet conversion
//! - Shell completion generation

use anyhow::{Context, Result, bail};
use arduflash::cart::{self, JedecId};
use arduflash::image::flashcart::{self, BuildReport};
use arduflash::image::hex::SketchImage;
use arduflash::image::sprite::{self, SpriteParams};
use arduflash::port::{Host, NativeHost};
use arduflash::{MIN_CART_VERSION, Session, device, eeprom, sketch};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// arduflash - tools for the Arduboy Caterina serial bootloader.
#[derive(Parser)]
#[command(name = "arduflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Save the 1 KiB EEPROM to a file.
    EepromBackup {
        /// Output file (default: timestamped eeprom-backup-*.bin).
        output: Option<PathBuf>,
    },

    /// Write an EEPROM image back to the device.
    EepromRestore {
        /// EEPROM image, exactly 1024 bytes.
        file: PathBuf,
    },

    /// Erase the EEPROM (all bytes to 0xFF).
    EepromErase,

    /// Save the application flash to a file.
    SketchBackup {
        /// Output file (default: timestamped sketch-backup-*.bin).
        output: Option<PathBuf>,
    },

    /// Erase the sketch startup page so the bootloader stays active.
    SketchErase,

    /// Flash an Intel-HEX sketch and verify it.
    Upload {
        /// Sketch in Intel-HEX format.
        hexfile: PathBuf,
    },

    /// Save the whole flash cart to a file.
    CartBackup {
        /// Output file (default: timestamped cart-backup-*.bin).
        output: Option<PathBuf>,
    },

    /// Write a flashcart image (or development data) to the flash cart.
    CartWrite {
        /// Start page (decimal or 0x-prefixed hex); defaults to 0.
        page: Option<String>,

        /// Flashcart image file.
        file: Option<PathBuf>,

        /// Verify every block after writing it.
        #[arg(long)]
        verify: bool,

        /// Development data file, placed at the end of the cart.
        #[arg(short, long)]
        datafile: Option<PathBuf>,

        /// Development save file, placed after the data.
        #[arg(short, long)]
        savefile: Option<PathBuf>,

        /// Blank development save area size in bytes.
        #[arg(short = 'z', long)]
        savesize: Option<u32>,
    },

    /// Build a flashcart image from a CSV index.
    CartBuild {
        /// Index file: list;title;titlescreen;hexfile;datafile;savefile.
        index: PathBuf,
    },

    /// Convert sprite sheet images to C++ headers and raw binaries.
    Convert {
        /// Images to convert (frame size encoded as name_WxH_S.png).
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a cart page number (decimal, or hex with a 0x prefix).
fn parse_page(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        u16::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("Invalid page number '{s}': {e}"))
}

/// Timestamped default output name, e.g. `cart-backup-1724371200.bin`.
fn default_output(prefix: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    PathBuf::from(format!("{prefix}-{stamp}.bin"))
}

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    debug!(
        "arduflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        // Leave the message on screen for double-click users before the
        // window closes.
        if stderr_is_tty {
            std::thread::sleep(Duration::from_secs(2));
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::ListPorts { json } => {
            cmd_list_ports(*json)?;
        },
        Commands::EepromBackup { output } => {
            cmd_eeprom_backup(cli, output.as_deref())?;
        },
        Commands::EepromRestore { file } => {
            cmd_eeprom_restore(cli, file)?;
        },
        Commands::EepromErase => {
            cmd_eeprom_erase(cli)?;
        },
        Commands::SketchBackup { output } => {
            cmd_sketch_backup(cli, output.as_deref())?;
        },
        Commands::SketchErase => {
            cmd_sketch_erase(cli)?;
        },
        Commands::Upload { hexfile } => {
            cmd_upload(cli, hexfile)?;
        },
        Commands::CartBackup { output } => {
            cmd_cart_backup(cli, output.as_deref())?;
        },
        Commands::CartWrite {
            page,
            file,
            verify,
            datafile,
            savefile,
            savesize,
        } => {
            cmd_cart_write(
                cli,
                page.as_deref(),
                file.as_deref(),
                *verify,
                datafile.as_deref(),
                savefile.as_deref(),
                *savesize,
            )?;
        },
        Commands::CartBuild { index } => {
            cmd_cart_build(cli, index)?;
        },
        Commands::Convert { images } => {
            cmd_convert(cli, images)?;
        },
        Commands::Completions { shell } => {
            cmd_completions(*shell);
        },
    }

    Ok(())
}

/// Discover the device, reset it into the bootloader, and connect.
fn connect(cli: &Cli) -> Result<Session<NativeHost>> {
    let mut session = Session::new(NativeHost::default());

    let cancel = session.cancel_flag();
    ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))
        .context("Failed to install Ctrl-C handler")?;

    if !cli.quiet {
        eprintln!("{} Looking for an Arduboy...", style("⏳").yellow());
    }
    session.start()?;
    if !cli.quiet {
        eprintln!("{} Connected", style("✓").green());
    }
    Ok(session)
}

/// Connect and check that the bootloader and flash cart can do cart
/// transfers at all, before anything is modified.
fn connect_cart(cli: &Cli) -> Result<(Session<NativeHost>, JedecId)> {
    let mut session = connect(cli)?;

    let version = session.get_version()?;
    if version < MIN_CART_VERSION {
        bail!(arduflash::Error::UnsupportedBootloader { version });
    }

    let jedec = session.get_jedec_id()?;
    if !cli.quiet {
        eprintln!(
            "{} Flash cart: JEDEC ID {:02X}{:02X}{:02X} ({}), {} KiB",
            style("ℹ").blue(),
            jedec.manufacturer,
            jedec.device,
            jedec.capacity_exp,
            jedec
                .manufacturer_name()
                .unwrap_or("unknown manufacturer"),
            jedec.capacity() / 1024
        );
    }
    Ok((session, jedec))
}

/// Create a progress bar over `total` transfer steps.
fn transfer_bar(cli: &Cli, total: usize, msg: &'static str) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(total as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message(msg);
        pb
    }
}

fn save_output(cli: &Cli, path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Saved {} bytes to {}",
            style("✓").green().bold(),
            data.len(),
            style(path.display()).cyan()
        );
    }
    Ok(())
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativeHost::default().list_ports()?;

    if json {
        let entries: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                let board = p
                    .vid
                    .zip(p.pid)
                    .and_then(|(vid, pid)| device::classify(vid, pid));
                serde_json::json!({
                    "name": p.name,
                    "board": board.map(|(_, b)| b.name),
                    "bootloader": board.map(|(i, _)| i % 2 == 0),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial_number,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let board = port
            .vid
            .zip(port.pid)
            .and_then(|(vid, pid)| device::classify(vid, pid));
        let board_str = match board {
            Some((index, b)) if index % 2 == 0 => {
                format!(" [{} bootloader]", style(b.name).yellow())
            },
            Some((_, b)) => format!(" [{}]", style(b.name).yellow()),
            None => String::new(),
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .unwrap_or("");

        eprintln!(
            "  {} {}{}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            board_str,
            vid_pid,
            if product.is_empty() {
                String::new()
            } else {
                format!(" - {}", style(product).dim())
            }
        );
    }

    if let Some(m) = device::find_device(&ports) {
        eprintln!(
            "\n{} Would use {} ({})",
            style("→").green().bold(),
            style(&m.port.name)
                .cyan()
                .bold(),
            if m.boot_mode {
                "bootloader mode"
            } else {
                "application mode"
            }
        );
    }
    Ok(())
}

/// EEPROM backup command implementation.
fn cmd_eeprom_backup(cli: &Cli, output: Option<&Path>) -> Result<()> {
    let output = output.map_or_else(|| default_output("eeprom-backup"), Path::to_path_buf);

    let mut session = connect(cli)?;
    let data = eeprom::backup(&mut session)?;
    session.exit()?;

    save_output(cli, &output, &data)
}

/// EEPROM restore command implementation.
fn cmd_eeprom_restore(cli: &Cli, file: &Path) -> Result<()> {
    let data = fs::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    // Validate before touching the device.
    if data.len() != eeprom::SIZE {
        bail!(
            "{} is {} bytes, an EEPROM image must be exactly {} bytes",
            file.display(),
            data.len(),
            eeprom::SIZE
        );
    }

    let mut session = connect(cli)?;
    eeprom::restore(&mut session, &data)?;
    session.exit()?;

    if !cli.quiet {
        eprintln!("{} EEPROM restored", style("✓").green().bold());
    }
    Ok(())
}

/// EEPROM erase command implementation.
fn cmd_eeprom_erase(cli: &Cli) -> Result<()> {
    let mut session = connect(cli)?;
    eeprom::erase(&mut session)?;
    session.exit()?;

    if !cli.quiet {
        eprintln!("{} EEPROM erased", style("✓").green().bold());
    }
    Ok(())
}

/// Sketch backup command implementation.
fn cmd_sketch_backup(cli: &Cli, output: Option<&Path>) -> Result<()> {
    let output = output.map_or_else(|| default_output("sketch-backup"), Path::to_path_buf);

    let mut session = connect(cli)?;
    let data = sketch::backup(&mut session)?;
    session.exit()?;

    save_output(cli, &output, &data)
}

/// Sketch erase command implementation.
fn cmd_sketch_erase(cli: &Cli) -> Result<()> {
    let mut session = connect(cli)?;
    let blank = sketch::erase_startup_page(&mut session)?;
    session.exit()?;

    if !blank {
        bail!("Startup page did not read back blank after erase");
    }
    if !cli.quiet {
        eprintln!("{} Sketch startup page erased", style("✓").green().bold());
    }
    Ok(())
}

/// Upload command implementation.
fn cmd_upload(cli: &Cli, hexfile: &Path) -> Result<()> {
    // Parse before touching the device.
    let image = SketchImage::load(hexfile)
        .with_context(|| format!("Failed to load {}", hexfile.display()))?;
    if image.used_page_count() == 0 {
        bail!("{} contains no data records", hexfile.display());
    }
    if !cli.quiet {
        eprintln!(
            "{} Flashing {} pages ({} bytes)",
            style("ℹ").blue(),
            image.used_page_count(),
            image.used_page_count() * sketch::PAGE_SIZE
        );
    }

    let mut session = connect(cli)?;
    let pb = transfer_bar(cli, image.used_page_count() * 2, "flashing + verifying");
    let result = sketch::upload(&mut session, &image, |done, _| {
        pb.set_position(done as u64);
    });
    if result.is_ok() {
        pb.finish_with_message("done");
    } else {
        pb.finish_and_clear();
    }
    exit_after(session, result)?;

    if !cli.quiet {
        eprintln!("{} Upload complete", style("🎉").green().bold());
    }
    Ok(())
}

/// Leave the bootloader whether or not the transfer succeeded, so a failure
/// doesn't park the board there until the next power cycle.
fn exit_after<H: Host, T>(session: Session<H>, result: arduflash::Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            session.exit()?;
            Ok(value)
        },
        Err(err) => {
            let _ = session.exit();
            Err(err.into())
        },
    }
}

/// Cart backup command implementation.
fn cmd_cart_backup(cli: &Cli, output: Option<&Path>) -> Result<()> {
    let output = output.map_or_else(|| default_output("cart-backup"), Path::to_path_buf);

    let (mut session, jedec) = connect_cart(cli)?;
    let blocks = jedec.blocks();
    let started = Instant::now();
    let pb = transfer_bar(cli, blocks, "reading");
    let data = cart::read_cart(&mut session, blocks, |done, _| {
        pb.set_position(done as u64);
    })?;
    pb.finish_with_message("done");
    session.exit()?;

    save_output(cli, &output, &data)?;
    if !cli.quiet {
        eprintln!("Done in {:.2} seconds", started.elapsed().as_secs_f64());
    }
    Ok(())
}

/// Cart write command implementation.
#[allow(clippy::too_many_arguments)]
fn cmd_cart_write(
    cli: &Cli,
    page: Option<&str>,
    file: Option<&Path>,
    verify: bool,
    datafile: Option<&Path>,
    savefile: Option<&Path>,
    savesize: Option<u32>,
) -> Result<()> {
    if datafile.is_some() || savefile.is_some() || savesize.is_some() {
        if page.is_some() || file.is_some() {
            bail!("Development data options replace the PAGE and FILE arguments");
        }
        return cmd_cart_write_dev(cli, verify, datafile, savefile, savesize);
    }

    // With a single positional argument it is the file, not the page.
    let (start_page, file) = match (page, file) {
        (Some(page), Some(file)) => (
            parse_page(page).map_err(|e| anyhow::anyhow!(e))?,
            file.to_path_buf(),
        ),
        (Some(file), None) => (0, PathBuf::from(file)),
        _ => bail!("A flashcart image FILE is required"),
    };

    let data = fs::read(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if data.is_empty() {
        bail!("{} is empty", file.display());
    }

    let (mut session, jedec) = connect_cart(cli)?;
    let end = start_page as usize * cart::PAGE_SIZE + data.len();
    if end > jedec.capacity() {
        bail!(
            "Image of {} bytes at page {start_page} does not fit a {} KiB cart",
            data.len(),
            jedec.capacity() / 1024
        );
    }

    let started = Instant::now();
    let blocks = data
        .len()
        .div_ceil(cart::BLOCK_SIZE);
    let pb = transfer_bar(cli, blocks, if verify { "writing + verifying" } else { "writing" });
    cart::write_cart(&mut session, start_page, data, verify, |done, _| {
        pb.set_position(done as u64);
    })?;
    pb.finish_with_message("done");
    session.exit()?;

    if !cli.quiet {
        eprintln!(
            "{} Done in {:.2} seconds",
            style("🎉").green().bold(),
            started.elapsed().as_secs_f64()
        );
    }
    Ok(())
}

/// Pad the development areas and place them at the very top of the cart.
///
/// Save areas are erased in whole 64 KiB blocks by the sketch, so the save
/// stays block-aligned at the end; the data area sits directly below it.
/// Returns (data page, save page).
fn dev_layout(
    data: &mut Vec<u8>,
    save: &mut Vec<u8>,
    total_pages: usize,
) -> Result<(usize, usize)> {
    if !save.is_empty() {
        let padded = save
            .len()
            .div_ceil(cart::BLOCK_SIZE)
            * cart::BLOCK_SIZE;
        save.resize(padded, 0xFF);
    }
    if !data.is_empty() {
        let padded = data
            .len()
            .div_ceil(cart::PAGE_SIZE)
            * cart::PAGE_SIZE;
        data.resize(padded, 0xFF);
    }

    let save_pages = save.len() / cart::PAGE_SIZE;
    let data_pages = data.len() / cart::PAGE_SIZE;
    if save_pages + data_pages > total_pages {
        bail!("Data and save areas do not fit a {} KiB cart", total_pages / 4);
    }
    let save_page = total_pages - save_pages;
    Ok((save_page - data_pages, save_page))
}

/// Development mode: place data and save areas at the end of the cart and
/// print the matching sketch configuration.
fn cmd_cart_write_dev(
    cli: &Cli,
    verify: bool,
    datafile: Option<&Path>,
    savefile: Option<&Path>,
    savesize: Option<u32>,
) -> Result<()> {
    let mut data = match datafile {
        Some(path) => fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => Vec::new(),
    };
    let mut save = match (savefile, savesize) {
        (Some(path), _) => fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, Some(bytes)) => vec![0xFF; bytes as usize],
        (None, None) => Vec::new(),
    };
    if data.is_empty() && save.is_empty() {
        bail!("Nothing to write: the data and save areas are both empty");
    }

    let (mut session, jedec) = connect_cart(cli)?;
    let total_pages = jedec.capacity() / cart::PAGE_SIZE;
    let (data_page, save_page) = dev_layout(&mut data, &mut save, total_pages)?;
    let has_save = !save.is_empty();

    if !data.is_empty() {
        let pb = transfer_bar(cli, data.len().div_ceil(cart::BLOCK_SIZE), "writing data");
        cart::write_cart(&mut session, data_page as u16, data, verify, |done, _| {
            pb.set_position(done as u64);
        })?;
        pb.finish_with_message("done");
    }
    if !save.is_empty() {
        let pb = transfer_bar(cli, save.len() / cart::BLOCK_SIZE, "writing save");
        cart::write_cart(&mut session, save_page as u16, save, verify, |done, _| {
            pb.set_position(done as u64);
        })?;
        pb.finish_with_message("done");
    }
    session.exit()?;

    // The values a development sketch needs to reach these areas.
    println!("Data page: 0x{data_page:04X}");
    if has_save {
        println!("Save page: 0x{save_page:04X}");
        println!("Cart::begin(0x{data_page:04X}, 0x{save_page:04X});");
    } else {
        println!("Cart::begin(0x{data_page:04X});");
    }
    Ok(())
}

/// Cart build command implementation.
fn cmd_cart_build(cli: &Cli, index: &Path) -> Result<()> {
    let output = build_output_name(index);

    let mut file = fs::File::create(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let report = flashcart::build_image(index, &mut file)
        .with_context(|| format!("Failed to build {}", index.display()))?;

    if !cli.quiet {
        print_build_report(&report);
        eprintln!(
            "\n{} Wrote {} ({} KiB) ",
            style("✓").green().bold(),
            style(output.display()).cyan(),
            report.kibibytes()
        );
    }
    Ok(())
}

/// `menu-index.csv` -> `menu-image.bin`, next to the index.
fn build_output_name(index: &Path) -> PathBuf {
    let stem = index
        .file_stem()
        .map(|s| {
            s.to_string_lossy()
                .to_lowercase()
        })
        .unwrap_or_default()
        .replace("-index", "");
    index.with_file_name(format!("{stem}-image.bin"))
}

fn print_build_report(report: &BuildReport) {
    eprintln!("{}", style("Flashcart layout:").bold().underlined());
    for slot in &report.slots {
        eprintln!(
            "  {} page 0x{:04X} list {:>2} {:>4} pages  {}",
            style(if slot.has_program { "▶" } else { "•" }).green(),
            slot.page,
            slot.list,
            slot.pages,
            style(&slot.title).cyan()
        );
    }
    eprintln!(
        "\n  {} title screens, {} sketches, {} pages used",
        report.slots.len(),
        report.sketches,
        report.pages
    );
}

/// Convert command implementation.
fn cmd_convert(cli: &Cli, images: &[PathBuf]) -> Result<()> {
    for path in images {
        let params = SpriteParams::from_filename(path);
        let img = image::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .to_rgba8();
        let converted = sprite::convert(&img, &params)
            .with_context(|| format!("Failed to convert {}", path.display()))?;

        // Keep the full stem so sheets like tiles_8x8.png and tiles_16x16.png
        // don't overwrite each other's output.
        let header_path = path.with_extension("h");
        let bin_path = path.with_extension("bin");
        fs::write(&header_path, converted.to_header())
            .with_context(|| format!("Failed to write {}", header_path.display()))?;
        fs::write(&bin_path, converted.to_bin())
            .with_context(|| format!("Failed to write {}", bin_path.display()))?;

        if !cli.quiet {
            eprintln!(
                "{} {} -> {} + {} ({}x{}, {} frames{})",
                style("✓").green(),
                path.display(),
                style(header_path.display()).cyan(),
                style(bin_path.display()).cyan(),
                converted.frame_width,
                converted.frame_height,
                converted.hframes * converted.vframes,
                if converted.transparent {
                    ", masked"
                } else {
                    ""
                }
            );
        }
    }
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd
        .get_name()
        .to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}


#[cfg(test)]
mod session_exit_tests {
    use super::*;
    use arduflash::port::{Port, PortInfo};
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ScriptState {
        written: Vec<u8>,
        replies: VecDeque<u8>,
    }

    /// A port whose device refuses the upload: Caterina 1.0 with the boot
    /// section locked.
    #[derive(Clone, Default)]
    struct ScriptPort(Arc<Mutex<ScriptState>>);

    impl Read for ScriptPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let mut state = self
                .0
                .lock()
                .unwrap();
            if state
                .replies
                .is_empty()
            {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no reply"));
            }
            let n = buf
                .len()
                .min(state.replies.len());
            for slot in &mut buf[..n] {
                *slot = state
                    .replies
                    .pop_front()
                    .unwrap();
            }
            Ok(n)
        }
    }

    impl Write for ScriptPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut state = self
                .0
                .lock()
                .unwrap();
            state
                .written
                .extend_from_slice(buf);
            for &byte in buf {
                match byte {
                    b'V' => state
                        .replies
                        .extend(*b"10"),
                    b'r' => state
                        .replies
                        .push_back(0x10),
                    b'E' => state
                        .replies
                        .push_back(0x0D),
                    _ => {},
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for ScriptPort {
        fn close(&mut self) -> arduflash::Result<()> {
            Ok(())
        }
    }

    struct ScriptHost(ScriptPort);

    impl Host for ScriptHost {
        type Port = ScriptPort;

        fn list_ports(&mut self) -> arduflash::Result<Vec<PortInfo>> {
            let mut info = PortInfo::named("/dev/ttyACM0");
            info.vid = Some(0x2341);
            info.pid = Some(0x0036);
            Ok(vec![info])
        }

        fn open(&mut self, _name: &str, _baud_rate: u32) -> arduflash::Result<ScriptPort> {
            Ok(self
                .0
                .clone())
        }

        fn sleep(&mut self, _duration: Duration) {}
    }

    #[test]
    fn failed_upload_still_leaves_the_bootloader() {
        let port = ScriptPort::default();
        let mut session = Session::new(ScriptHost(port.clone()));
        session
            .start()
            .unwrap();

        // A record at 0x7000 reaches the locked bootloader area, so the
        // upload is refused before anything is flashed.
        let image = SketchImage::parse(":02700000000A84\n:00000001FF\n").unwrap();
        let result = sketch::upload(&mut session, &image, |_, _| {});
        assert!(result.is_err());

        assert!(exit_after(session, result).is_err());
        let written = port
            .0
            .lock()
            .unwrap()
            .written
            .clone();
        assert_eq!(written.last(), Some(&b'E'));
    }
}
