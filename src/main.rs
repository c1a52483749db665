use std::io::Write as _;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::LevelFilter;
use rand::distributions::Alphanumeric;
use rand::Rng;

use rucksack_bundle::manifest::{self, BuildOptions};
use rucksack_bundle::{texture, Bundle, Error, Result};

mod cli;
use cli::{Cli, Command};

fn main() {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Command::Bundle { verbose: true, .. });
    setup_diagnostics(verbose);

    if let Err(e) = run(cli.command) {
        match &e {
            Error::Parse(_) => eprintln!("rucksack: {e}"),
            other => eprintln!("rucksack: {}", other.err_str()),
        }
        std::process::exit(1);
    }
}

fn setup_diagnostics(verbose: bool) {
    env_logger::Builder::new()
        .filter_level(if verbose { LevelFilter::Debug } else { LevelFilter::Warn })
        .format_timestamp(None)
        .format_target(false)
        .parse_default_env()
        .init();
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Bundle {
            assets_json,
            bundle,
            prefix,
            verbose: _,
            deps,
        } => cmd_bundle(assets_json, bundle, prefix, deps),
        Command::Cat { bundle, key, texture } => cmd_cat(bundle, key, texture),
        Command::Ls { bundle } => cmd_ls(bundle),
        Command::Strip { bundle } => cmd_strip(bundle),
    }
}

fn cmd_bundle(
    assets_json: PathBuf,
    bundle_path: PathBuf,
    prefix: Option<PathBuf>,
    deps: Option<PathBuf>,
) -> Result<()> {
    let prefix = match prefix {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    let options = BuildOptions { prefix };

    let mut bundle = Bundle::open(&bundle_path)?;
    let deps_list = manifest::build(&mut bundle, &assets_json, &options)?;
    bundle.close()?;

    if let Some(deps_path) = deps {
        manifest::write_deps_file(&deps_path, &bundle_path, &deps_list)?;
    }
    Ok(())
}

fn cmd_cat(bundle_path: PathBuf, key: String, raw_texture: bool) -> Result<()> {
    let mut bundle = Bundle::open_read(&bundle_path)?;
    let idx = bundle
        .find(key.as_bytes())
        .ok_or_else(|| Error::NotFound(key.clone()))?;

    let is_tex = bundle.is_texture(idx)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if is_tex && raw_texture {
        let (descriptor, payload) = bundle.open_texture(idx)?;
        out.write_all(texture::pixel_data(&payload, &descriptor))?;
    } else if is_tex {
        let (descriptor, payload) = bundle.open_texture(idx)?;
        let mut images = serde_json::Map::new();
        for img in &descriptor.images {
            images.insert(
                String::from_utf8_lossy(&img.key).into_owned(),
                serde_json::json!({
                    "x": img.x,
                    "y": img.y,
                    "w": img.width,
                    "h": img.height,
                    "r90": img.r90,
                    "anchor": { "x": img.anchor.x, "y": img.anchor.y },
                }),
            );
        }
        let doc = serde_json::json!({
            "bytes": payload.len() as u64,
            "maxWidth": descriptor.max_width,
            "maxHeight": descriptor.max_height,
            "pow2": descriptor.pow2,
            "allowRotate90": descriptor.allow_r90,
            "images": images,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
    } else {
        out.write_all(&bundle.file_read(idx)?)?;
    }
    Ok(())
}

fn cmd_ls(bundle_path: PathBuf) -> Result<()> {
    let bundle = Bundle::open_read(&bundle_path)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for key in bundle.keys() {
        writeln!(out, "{}", String::from_utf8_lossy(&key))?;
    }
    Ok(())
}

fn cmd_strip(bundle_path: PathBuf) -> Result<()> {
    let mut src = Bundle::open_read(&bundle_path)?;
    let headers_size = src.headers_byte_count();

    let dir = bundle_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(".rucksack-strip-{}", random_suffix(12)));

    {
        let mut dst = Bundle::open_precise(&tmp_path, headers_size)?;
        for idx in 0..src.file_count() {
            let key = src.file_key(idx).to_vec();
            let mtime = src.file_mtime(idx);
            let data = src.file_read(idx)?;
            let stream = dst.add_stream_precise(&key, data.len() as u64, mtime)?;
            dst.stream_write(&stream, &data)?;
            dst.stream_close(stream)?;
        }
        dst.close()?;
    }

    std::fs::rename(&tmp_path, &bundle_path)?;
    Ok(())
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
