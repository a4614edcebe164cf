use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::DynamicImage;
use serde::Serialize;
use tokio::time::sleep;

use crate::config::{MatchSettings, Timing};
use crate::detector::{self, PreparedTemplate};
use crate::screen::Screen;
use crate::state::RunControl;
use crate::status::Level;

/// One entry of the ordered template list. `image` is `None` when the file
/// could not be found or decoded.
pub struct TemplateEntry {
    pub name: String,
    pub path: Option<PathBuf>,
    pub image: Option<PreparedTemplate>,
}

/// Harvest-target templates in priority order.
pub struct TemplateSet {
    entries: Vec<TemplateEntry>,
}

impl TemplateSet {
    /// Resolve and decode every named template. Missing or unreadable files
    /// are kept as empty entries and skipped at scan time.
    pub fn load(names: &[String], dirs: &[PathBuf], scale_down: u32) -> Self {
        let entries = names
            .iter()
            .map(|name| {
                let path = detector::resolve_template(dirs, name);
                let image = match &path {
                    Some(p) => match image::open(p) {
                        Ok(img) => {
                            tracing::info!("loaded template image: {}", p.display());
                            detector::prepare_template(&img, scale_down)
                        }
                        Err(e) => {
                            tracing::warn!("failed to decode {}: {e}", p.display());
                            None
                        }
                    },
                    None => {
                        tracing::warn!("template image {name} not found in any search path");
                        None
                    }
                };
                TemplateEntry {
                    name: name.clone(),
                    path,
                    image,
                }
            })
            .collect();
        Self { entries }
    }

    /// Build from already-decoded images (tests, calibration tools).
    pub fn from_images(images: Vec<(String, DynamicImage)>, scale_down: u32) -> Self {
        let entries = images
            .into_iter()
            .map(|(name, img)| TemplateEntry {
                image: detector::prepare_template(&img, scale_down),
                path: None,
                name,
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    pub fn available(&self) -> usize {
        self.entries.iter().filter(|e| e.image.is_some()).count()
    }
}

/// A detected harvest target: where to click and which template found it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestTarget {
    pub x: u32,
    pub y: u32,
    pub template_id: String,
    pub score: f32,
}

pub struct HarvestScanner {
    screen: Arc<dyn Screen>,
    templates: Arc<TemplateSet>,
    control: Arc<RunControl>,
    settings: MatchSettings,
    timing: Timing,
}

impl HarvestScanner {
    pub fn new(
        screen: Arc<dyn Screen>,
        templates: Arc<TemplateSet>,
        control: Arc<RunControl>,
        settings: MatchSettings,
        timing: Timing,
    ) -> Self {
        Self {
            screen,
            templates,
            control,
            settings,
            timing,
        }
    }

    /// Scan once for a harvest target. The first template (in list order)
    /// that matches wins; each detection bumps the resource counter.
    pub async fn scan(&self) -> Result<Option<HarvestTarget>> {
        self.control
            .report(Level::Info, "Scanning screen for water...");

        let found = self.locate_first().await?;
        match &found {
            Some(target) => {
                self.control.report(
                    Level::Success,
                    &format!(
                        "Water found at ({}, {}) using '{}'!",
                        target.x, target.y, target.template_id
                    ),
                );
                self.control.increment_resource();
            }
            None => {
                self.control.report(Level::Info, "Water not found");
                sleep(self.timing.scan_miss).await;
            }
        }
        Ok(found)
    }

    /// First matching template on a fresh capture, without side effects.
    pub async fn locate_first(&self) -> Result<Option<HarvestTarget>> {
        for entry in self.templates.entries() {
            if entry.image.is_none() {
                self.control.report(
                    Level::Warning,
                    &format!("Water image file not found: {}", entry.name),
                );
            }
        }
        if self.templates.available() == 0 {
            return Ok(None);
        }

        let screen = self.screen.clone();
        let templates = self.templates.clone();
        let settings = self.settings.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<HarvestTarget>> {
            let frame = screen.capture().context("failed to capture screen")?;
            let gray = detector::prepare_frame(&DynamicImage::ImageRgba8(frame), settings.scale_down);

            for entry in templates.entries() {
                let Some(template) = &entry.image else {
                    continue;
                };
                match detector::locate(&gray, template, settings.scale_down, settings.confidence) {
                    Some(m) => {
                        return Ok(Some(HarvestTarget {
                            x: m.x,
                            y: m.y,
                            template_id: entry.name.clone(),
                            score: m.score,
                        }));
                    }
                    None => {
                        tracing::debug!("'{}' not found on screen, trying next template", entry.name);
                    }
                }
            }
            Ok(None)
        })
        .await
        .context("template matching task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, RgbaImage};

    use super::*;
    use crate::detector::tests::{crop, noise_frame, noise_in};
    use crate::input::tests::fast_timing;
    use crate::status::tests::RecordingSink;

    struct FrameScreen(GrayImage);

    impl Screen for FrameScreen {
        fn capture(&self) -> Result<RgbaImage> {
            Ok(DynamicImage::ImageLuma8(self.0.clone()).to_rgba8())
        }
    }

    fn scanner(frame: GrayImage, templates: TemplateSet) -> (HarvestScanner, Arc<RunControl>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let control = Arc::new(RunControl::new(sink.clone()));
        control.start();
        let scanner = HarvestScanner::new(
            Arc::new(FrameScreen(frame)),
            Arc::new(templates),
            control.clone(),
            MatchSettings::default(),
            fast_timing(),
        );
        (scanner, control, sink)
    }

    fn luma(img: GrayImage) -> DynamicImage {
        DynamicImage::ImageLuma8(img)
    }

    #[tokio::test]
    async fn test_first_match_in_list_order_wins() {
        let frame = noise_frame(96, 64, 11);
        let templates = TemplateSet::from_images(
            vec![
                ("second_on_screen.png".into(), luma(crop(&frame, 60, 30, 14, 12))),
                ("first_on_screen.png".into(), luma(crop(&frame, 5, 5, 14, 12))),
            ],
            1,
        );
        let (scanner, control, _) = scanner(frame, templates);

        let target = scanner.scan().await.unwrap().unwrap();
        assert_eq!(target.template_id, "second_on_screen.png");
        assert_eq!((target.x, target.y), (67, 36));
        assert_eq!(control.resource_count(), 1);
    }

    #[tokio::test]
    async fn test_falls_through_to_later_template() {
        let frame = noise_frame(96, 64, 12);
        let templates = TemplateSet::from_images(
            vec![
                ("absent.png".into(), luma(noise_frame(14, 12, 500))),
                ("present.png".into(), luma(crop(&frame, 40, 20, 14, 12))),
            ],
            1,
        );
        let (scanner, _, _) = scanner(frame, templates);

        let target = scanner.scan().await.unwrap().unwrap();
        assert_eq!(target.template_id, "present.png");
    }

    #[tokio::test]
    async fn test_missing_files_skipped_with_warning() {
        let frame = noise_frame(96, 64, 13);
        let dir = tempfile::tempdir().unwrap();
        luma(crop(&frame, 10, 30, 16, 16))
            .save(dir.path().join("w_elem_02.png"))
            .unwrap();

        let names = vec!["w_elem_01.png".to_string(), "w_elem_02.png".to_string()];
        let templates = TemplateSet::load(&names, &[dir.path().to_path_buf()], 1);
        assert_eq!(templates.available(), 1);
        assert!(templates.entries()[0].path.is_none());

        let (scanner, _, sink) = scanner(frame, templates);
        let target = scanner.scan().await.unwrap().unwrap();
        assert_eq!(target.template_id, "w_elem_02.png");
        assert!(
            sink.texts()
                .iter()
                .any(|m| m.contains("not found") && m.contains("w_elem_01.png"))
        );
    }

    #[tokio::test]
    async fn test_no_match_leaves_counter_alone() {
        let frame = noise_frame(96, 64, 14);
        let templates = TemplateSet::from_images(
            vec![("absent.png".into(), luma(noise_frame(14, 12, 501)))],
            1,
        );
        let (scanner, control, _) = scanner(frame, templates);

        assert!(scanner.scan().await.unwrap().is_none());
        assert_eq!(control.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_plain_screen_is_not_a_target() {
        let frame = GrayImage::from_pixel(200, 150, image::Luma([128]));
        let templates = TemplateSet::from_images(
            vec![("w_elem_01.png".into(), luma(noise_in(24, 24, 77, 60, 220)))],
            1,
        );
        let (scanner, control, _) = scanner(frame, templates);

        assert!(scanner.scan().await.unwrap().is_none());
        assert_eq!(control.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_locate_first_has_no_side_effects() {
        let frame = noise_frame(96, 64, 15);
        let templates = TemplateSet::from_images(
            vec![("present.png".into(), luma(crop(&frame, 0, 0, 14, 12)))],
            1,
        );
        let (scanner, control, _) = scanner(frame, templates);

        assert!(scanner.locate_first().await.unwrap().is_some());
        assert_eq!(control.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_template_set_finds_nothing() {
        let (scanner, _, _) = scanner(noise_frame(32, 32, 1), TemplateSet::from_images(vec![], 1));
        assert!(scanner.scan().await.unwrap().is_none());
    }
}
