//! Run image selection
//!
//! An explicit `--run-image` always wins. Otherwise the candidates are the
//! user's mirrors, the builder's run image and the builder's mirrors, in
//! that order; the first one on the app image's registry is used. With no
//! registry match the first user mirror (or the builder's run image) is
//! chosen.

use crate::builder::metadata::RunImageMetadata;
use crate::config::Config;
use crate::error::{PackError, PackResult};
use crate::image::ImageRef;
use std::collections::BTreeMap;
use tracing::debug;

/// User mirrors for `image`: `additional` replaces the configured ones
pub fn user_mirrors(image: &str, config: &Config, additional: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    match additional.get(image) {
        Some(mirrors) => mirrors.clone(),
        None => config.mirrors_for(image),
    }
}

/// Best candidate for `target` among the run image and its mirrors
pub fn best_mirror(target: &ImageRef, run: &RunImageMetadata, preferred: &[String]) -> String {
    let candidates = preferred
        .iter()
        .chain(std::iter::once(&run.image))
        .chain(run.mirrors.iter());
    for candidate in candidates {
        match ImageRef::parse(candidate) {
            Ok(reference) if reference.registry() == target.registry() => return candidate.clone(),
            Ok(_) => {}
            Err(e) => debug!("Skipping run image candidate {}: {}", candidate, e),
        }
    }
    preferred.first().cloned().unwrap_or_else(|| run.image.clone())
}

/// Resolve the run image for a build of `target`
pub fn resolve_run_image(
    explicit: Option<&str>,
    target: &ImageRef,
    builder_run_images: &[RunImageMetadata],
    config: &Config,
    additional: &BTreeMap<String, Vec<String>>,
) -> PackResult<String> {
    if let Some(image) = explicit.filter(|i| !i.is_empty()) {
        return Ok(image.to_string());
    }
    let run = builder_run_images
        .first()
        .filter(|r| !r.image.is_empty())
        .ok_or_else(|| PackError::invalid("builder has no run image; pass --run-image"))?;
    let preferred = user_mirrors(&run.image, config, additional);
    Ok(best_mirror(target, run, &preferred))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunImageMirrors;

    fn run() -> Vec<RunImageMetadata> {
        vec![RunImageMetadata {
            image: "example/run:jammy".into(),
            mirrors: vec!["registry.example.com/run:jammy".into(), "other.io/run:jammy".into()],
        }]
    }

    fn target(s: &str) -> ImageRef {
        ImageRef::parse(s).unwrap()
    }

    #[test]
    fn explicit_run_image_wins() {
        let chosen = resolve_run_image(
            Some("my/run"),
            &target("registry.example.com/app"),
            &run(),
            &Config::default(),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(chosen, "my/run");
    }

    #[test]
    fn prefers_mirror_on_app_registry() {
        let pick = |app: &str| {
            resolve_run_image(None, &target(app), &run(), &Config::default(), &BTreeMap::new()).unwrap()
        };
        assert_eq!(pick("registry.example.com/team/app"), "registry.example.com/run:jammy");
        assert_eq!(pick("other.io/app"), "other.io/run:jammy");
        assert_eq!(pick("local/app"), "example/run:jammy");
        assert_eq!(pick("unrelated.io/app"), "example/run:jammy");
    }

    #[test]
    fn user_mirrors_come_first() {
        let config = Config {
            run_images: vec![RunImageMirrors {
                image: "example/run:jammy".into(),
                mirrors: vec!["mine.io/run:jammy".into()],
            }],
            ..Default::default()
        };
        let chosen = resolve_run_image(None, &target("unrelated.io/app"), &run(), &config, &BTreeMap::new()).unwrap();
        assert_eq!(chosen, "mine.io/run:jammy");

        // a builder mirror on the app registry still beats a foreign user mirror
        let chosen = resolve_run_image(None, &target("other.io/app"), &run(), &config, &BTreeMap::new()).unwrap();
        assert_eq!(chosen, "other.io/run:jammy");

        let additional = BTreeMap::from([("example/run:jammy".to_string(), vec!["flag.io/run".to_string()])]);
        let chosen = resolve_run_image(None, &target("flag.io/app"), &run(), &config, &additional).unwrap();
        assert_eq!(chosen, "flag.io/run");
    }

    #[test]
    fn builder_without_run_image_needs_flag() {
        let err = resolve_run_image(None, &target("app"), &[], &Config::default(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, PackError::InvalidOptions(_)));
    }
}
