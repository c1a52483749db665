// src/manifest.rs
//! Manifest driver (C8): parses a JSON asset manifest and applies it to an
//! open bundle, with mtime-based incremental skip logic, touch/sweep
//! garbage collection, and makefile dependency-file emission.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::anchor::{Anchor, AnchorKind};
use crate::bundle::Bundle;
use crate::error::{Error, Result};
use crate::path_util;
use crate::texture::SourceImage;

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    textures: BTreeMap<String, TextureSpec>,
    #[serde(default)]
    files: BTreeMap<String, FileSpec>,
    #[serde(default, rename = "globFiles")]
    glob_files: Vec<GlobFileSpec>,
}

#[derive(Debug, Deserialize)]
struct TextureSpec {
    #[serde(rename = "maxWidth")]
    max_width: u32,
    #[serde(rename = "maxHeight")]
    max_height: u32,
    #[serde(default)]
    pow2: bool,
    #[serde(default, rename = "allowRotate90")]
    allow_rotate_90: bool,
    #[serde(default)]
    images: BTreeMap<String, ImageSpec>,
    #[serde(default, rename = "globImages")]
    glob_images: Vec<GlobImageSpec>,
}

#[derive(Debug, Deserialize)]
struct ImageSpec {
    path: String,
    #[serde(default)]
    anchor: Option<AnchorSpec>,
}

#[derive(Debug, Deserialize)]
struct GlobImageSpec {
    glob: String,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    anchor: Option<AnchorSpec>,
}

#[derive(Debug, Deserialize)]
struct FileSpec {
    path: String,
}

#[derive(Debug, Deserialize)]
struct GlobFileSpec {
    glob: String,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    path: String,
}

/// Either one of the nine named anchor positions, or an explicit coordinate
/// pair. Untagged: `"center"` deserialises as `Named`, `{"x":.., "y":..}` as
/// `Explicit`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnchorSpec {
    Named(String),
    Explicit { x: f64, y: f64 },
}

/// An anchor choice not yet resolved to coordinates -- named anchors need
/// the source image's pixel dimensions (only known after it's decoded) to
/// derive an absolute (x, y), so this is carried through `PendingImage`
/// instead of an already-resolved `Anchor`.
#[derive(Clone, Copy)]
enum AnchorChoice {
    Named(AnchorKind),
    Explicit(f64, f64),
}

impl AnchorChoice {
    /// Resolves to an absolute-pixel `Anchor` now that `width`/`height` are known.
    fn resolve(self, width: u32, height: u32) -> Anchor {
        match self {
            AnchorChoice::Named(kind) => Anchor::named(kind, width, height),
            AnchorChoice::Explicit(x, y) => Anchor::explicit(x, y),
        }
    }

    /// Whether `existing` (an anchor already recorded in a built texture)
    /// was derived from the same choice, for the incremental-rebuild dirty
    /// check -- same kind for named anchors, same kind and coordinates for
    /// explicit ones. Doesn't need the image's dimensions.
    fn matches_entry(&self, existing: &Anchor) -> bool {
        match self {
            AnchorChoice::Named(kind) => existing.kind == *kind,
            AnchorChoice::Explicit(x, y) => {
                existing.kind == AnchorKind::Explicit && existing.x == *x && existing.y == *y
            }
        }
    }
}

impl AnchorSpec {
    fn to_choice(&self) -> Result<AnchorChoice> {
        match self {
            AnchorSpec::Named(name) => Ok(AnchorChoice::Named(AnchorKind::from_name(name)?)),
            AnchorSpec::Explicit { x, y } => Ok(AnchorChoice::Explicit(*x, *y)),
        }
    }
}

fn resolve_anchor_choice(spec: &Option<AnchorSpec>) -> Result<AnchorChoice> {
    match spec {
        Some(spec) => spec.to_choice(),
        None => Ok(AnchorChoice::Named(AnchorKind::Center)),
    }
}

pub struct BuildOptions {
    pub prefix: PathBuf,
}

/// Parses `manifest_path` and applies it to `bundle`: adds/updates file and
/// texture entries, touches everything it visits, then sweeps anything left
/// untouched. Returns every path consulted along the way (manifest file,
/// resolved sources, glob base directories), in the order named in the
/// manifest, for the caller to hand to `write_deps_file`.
pub fn build(bundle: &mut Bundle, manifest_path: &Path, options: &BuildOptions) -> Result<Vec<PathBuf>> {
    let mut deps = vec![manifest_path.to_path_buf()];

    let text = std::fs::read_to_string(manifest_path)?;
    let manifest: Manifest = serde_json::from_str(&text)
        .map_err(|e| Error::parse_at(e.line() as u64, e.column() as u64, e))?;

    bundle.clear_touched();

    for (key, spec) in &manifest.files {
        build_file(bundle, &options.prefix, key, &spec.path, &mut deps)?;
    }

    for spec in &manifest.glob_files {
        build_glob_files(bundle, &options.prefix, spec, &mut deps)?;
    }

    for (key, spec) in &manifest.textures {
        build_texture(bundle, &options.prefix, key, spec, &mut deps)?;
    }

    bundle.delete_untouched()?;

    Ok(deps)
}

fn file_mtime(path: &Path) -> Result<u32> {
    let meta = std::fs::metadata(path)?;
    let modified = meta.modified()?;
    let secs = modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Ok(secs as u32)
}

fn build_file(bundle: &mut Bundle, prefix: &Path, key: &str, rel_path: &str, deps: &mut Vec<PathBuf>) -> Result<()> {
    let resolved = path_util::resolve(Some(prefix), Path::new(rel_path))?;
    add_or_skip_file(bundle, &resolved, key, deps)
}

fn build_glob_files(bundle: &mut Bundle, prefix: &Path, spec: &GlobFileSpec, deps: &mut Vec<PathBuf>) -> Result<()> {
    let base = path_util::join(prefix, Path::new(&spec.path));
    deps.push(base.clone());
    let pattern = base.join(&spec.glob);
    let hits = glob::glob(&pattern.to_string_lossy()).map_err(|e| Error::FileAccess(e.to_string()))?;
    for hit in hits {
        let hit = hit.map_err(|e| Error::FileAccess(e.to_string()))?;
        if hit.is_dir() {
            continue;
        }
        let rel = path_util::relative(&base, &hit)?;
        let key = format!("{}{}", spec.prefix, rel.display());
        add_or_skip_file(bundle, &hit, &key, deps)?;
    }
    Ok(())
}

fn add_or_skip_file(bundle: &mut Bundle, resolved: &Path, key: &str, deps: &mut Vec<PathBuf>) -> Result<()> {
    deps.push(resolved.to_path_buf());
    let source_mtime = file_mtime(resolved)?;
    let key_bytes = key.as_bytes();

    if let Some(idx) = bundle.find(key_bytes) {
        if source_mtime <= bundle.file_mtime(idx) {
            debug!("skip {key} (up to date)");
            bundle.touch(idx);
            return Ok(());
        }
    }

    debug!("add {key} from {}", resolved.display());
    bundle.add_file(key_bytes, resolved)?;
    let idx = bundle.find(key_bytes).expect("entry was just added");
    bundle.touch(idx);
    Ok(())
}

struct PendingImage {
    key: Vec<u8>,
    anchor: AnchorChoice,
    resolved: PathBuf,
    mtime: u32,
}

fn collect_texture_images(prefix: &Path, spec: &TextureSpec, deps: &mut Vec<PathBuf>) -> Result<Vec<PendingImage>> {
    let mut images = Vec::new();

    for (key, img_spec) in &spec.images {
        let resolved = path_util::resolve(Some(prefix), Path::new(&img_spec.path))?;
        deps.push(resolved.clone());
        let mtime = file_mtime(&resolved)?;
        images.push(PendingImage {
            key: key.as_bytes().to_vec(),
            anchor: resolve_anchor_choice(&img_spec.anchor)?,
            resolved,
            mtime,
        });
    }

    for glob_spec in &spec.glob_images {
        let base = path_util::join(prefix, Path::new(&glob_spec.path));
        deps.push(base.clone());
        let pattern = base.join(&glob_spec.glob);
        let hits = glob::glob(&pattern.to_string_lossy()).map_err(|e| Error::FileAccess(e.to_string()))?;
        for hit in hits {
            let hit = hit.map_err(|e| Error::FileAccess(e.to_string()))?;
            if hit.is_dir() {
                continue;
            }
            let rel = path_util::relative(&base, &hit)?;
            let key = format!("{}{}", glob_spec.prefix, rel.display());
            let mtime = file_mtime(&hit)?;
            deps.push(hit.clone());
            images.push(PendingImage {
                key: key.into_bytes(),
                anchor: resolve_anchor_choice(&glob_spec.anchor)?,
                resolved: hit,
                mtime,
            });
        }
    }

    Ok(images)
}

fn texture_is_dirty(
    bundle: &mut Bundle,
    idx: usize,
    pending: &[PendingImage],
    spec: &TextureSpec,
) -> Result<bool> {
    let entry_mtime = bundle.file_mtime(idx);
    let (descriptor, _) = bundle.open_texture(idx)?;

    if descriptor.max_width != spec.max_width
        || descriptor.max_height != spec.max_height
        || descriptor.pow2 != spec.pow2
        || descriptor.allow_r90 != spec.allow_rotate_90
    {
        return Ok(true);
    }

    for img in pending {
        if img.mtime > entry_mtime {
            return Ok(true);
        }
        match descriptor.images.iter().find(|existing| existing.key == img.key) {
            None => return Ok(true),
            Some(existing) => {
                if !img.anchor.matches_entry(&existing.anchor) {
                    return Ok(true);
                }
            }
        }
    }

    Ok(false)
}

fn build_texture(bundle: &mut Bundle, prefix: &Path, key: &str, spec: &TextureSpec, deps: &mut Vec<PathBuf>) -> Result<()> {
    let pending = collect_texture_images(prefix, spec, deps)?;
    let key_bytes = key.as_bytes();
    let existing_idx = bundle.find(key_bytes);

    let dirty = match existing_idx {
        Some(idx) => texture_is_dirty(bundle, idx, &pending, spec)?,
        None => true,
    };

    if !dirty {
        debug!("skip texture {key} (up to date)");
        bundle.texture_touch(existing_idx.expect("dirty check only runs against an existing entry"));
        return Ok(());
    }

    debug!(
        "{} texture {key}",
        if existing_idx.is_some() { "rebuild" } else { "add" }
    );

    let mut sources = Vec::with_capacity(pending.len());
    for img in &pending {
        let pixels = image::open(&img.resolved)?.to_rgba8();
        let anchor = img.anchor.resolve(pixels.width(), pixels.height());
        sources.push(SourceImage {
            key: img.key.clone(),
            anchor,
            pixels,
            forced_r90: false,
        });
    }

    bundle.add_texture(
        key_bytes,
        &sources,
        spec.max_width,
        spec.max_height,
        spec.pow2,
        spec.allow_rotate_90,
    )?;
    let idx = bundle.find(key_bytes).expect("texture was just added");
    bundle.texture_touch(idx);
    Ok(())
}

/// Writes a makefile fragment: `bundle_path: dep1 dep2 ...` wrapped at 80
/// columns with backslash continuations, followed by one empty rule per
/// dependency so a deleted dependency doesn't break the next `make` run.
pub fn write_deps_file(deps_path: &Path, bundle_path: &Path, deps: &[PathBuf]) -> Result<()> {
    let mut out = String::new();
    let head = format!("{}:", bundle_path.display());
    out.push_str(&head);
    let mut col = head.len();

    for dep in deps {
        let token = format!("{}", dep.display());
        let needed = token.len() + 1;
        if col + needed > 80 {
            out.push_str(" \\\n");
            col = 0;
        } else {
            out.push(' ');
            col += 1;
        }
        out.push_str(&token);
        col += token.len();
    }
    out.push('\n');

    for dep in deps {
        out.push('\n');
        out.push_str(&format!("{}:\n", dep.display()));
    }

    std::fs::write(deps_path, out)?;
    Ok(())
}
