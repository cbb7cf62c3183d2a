use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::assets::{AssetStore, ImageAsset};
use crate::config::{DEFAULT_EDIT_SUMMARY, ToolConfig};
use crate::diff::render_diff;
use crate::geometry::neighbors_within;
use crate::markup::patch_image_and_caption;
use crate::records::SystemRecord;
use crate::remote::{DocumentStore, resolve_document};

pub const DESCRIPTION_SUMMARY: &str =
    "Updating Planet image description per BattleTechWiki:Project_Planets/Mapping";
const MAP_LEGEND: &str = "([[BattleTechWiki:Map Legend|Map Legend]])";
const MAP_CATEGORY: &str = "[[Category:System Maps]]";

#[derive(Debug, Clone)]
pub struct ImageOptions {
    pub version: String,
    pub year: u32,
    /// Preview every write instead of performing it.
    pub pretend: bool,
    pub skip_remote_check: bool,
    pub force_comment_edit: bool,
    pub neighbor_radius: f64,
    pub max_redirects: usize,
    pub summary: String,
}

impl ImageOptions {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            version: config.images.version.clone(),
            year: config.images.year,
            pretend: false,
            skip_remote_check: config.images.skip_remote_check,
            force_comment_edit: config.images.force_comment_edit,
            neighbor_radius: config.images.neighbor_radius,
            max_redirects: config.wiki.max_redirects,
            summary: if config.audit.summary.is_empty() {
                DEFAULT_EDIT_SUMMARY.to_string()
            } else {
                config.audit.summary.clone()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagePageResult {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageUpdateReport {
    pub pretend: bool,
    pub uploaded: Vec<String>,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub pages: Vec<ImagePageResult>,
}

impl ImageUpdateReport {
    fn push(&mut self, title: impl Into<String>, action: &str, detail: Option<String>) {
        self.pages.push(ImagePageResult {
            title: title.into(),
            action: action.to_string(),
            detail,
        });
    }
}

struct PreparedImage<'a> {
    record: &'a SystemRecord,
    asset: ImageAsset,
    bytes: Vec<u8>,
}

/// Upload neighborhood maps for `selected` and point each system article at its map.
///
/// Local files are all checked and read before anything remote happens. Missing
/// articles and articles without image/caption lines are reported per page;
/// transport failures and redirect loops stop the run.
pub fn run_image_update<S, A>(
    store: &S,
    assets: &A,
    all: &[SystemRecord],
    selected: &[SystemRecord],
    options: &ImageOptions,
) -> Result<ImageUpdateReport>
where
    S: DocumentStore + ?Sized,
    A: AssetStore + ?Sized,
{
    let mut report = ImageUpdateReport {
        pretend: options.pretend,
        ..ImageUpdateReport::default()
    };

    log::info!("Ensuring images exist locally...");
    let mut located = Vec::new();
    let mut missing = Vec::new();
    for record in selected {
        let Some(asset) = ImageAsset::for_record(record, &options.version, options.year) else {
            log::warn!("{}: no wiki link, skipping", record.name);
            report.push(&record.name, "skipped", Some("no wiki link".to_string()));
            continue;
        };
        if !assets.exists(&asset.relative_path) {
            missing.push(asset.relative_path.display().to_string());
        }
        located.push((record, asset));
    }
    if !missing.is_empty() {
        bail!("missing local images: {}", missing.join(", "));
    }

    log::info!("Reading images in...");
    let mut prepared = Vec::with_capacity(located.len());
    for (record, asset) in located {
        let bytes = assets
            .read(&asset.relative_path)
            .with_context(|| format!("failed to read image for {}", record.name))?;
        prepared.push(PreparedImage {
            record,
            asset,
            bytes,
        });
    }

    if options.skip_remote_check {
        log::info!("Skipping remote image check for {} images", prepared.len());
    } else {
        log::info!("Uploading {} systems' images...", prepared.len());
        for image in &prepared {
            upload_if_needed(store, image, all, options, &mut report)?;
        }
    }

    log::info!("Updating {} systems...", prepared.len());
    for image in &prepared {
        update_article(store, image, options, &mut report)?;
    }
    Ok(report)
}

/// Why a remote file must be (re)uploaded, or `None` when it is current.
pub fn upload_reason(metadata: Option<&str>, version: &str, force: bool) -> Option<&'static str> {
    match metadata {
        None => Some("missing"),
        Some(metadata) if !metadata.contains(&version_tag(version)) => Some("older version"),
        Some(_) if force => Some("forcing a comment update"),
        Some(_) => None,
    }
}

pub fn version_tag(version: &str) -> String {
    format!("<info:version>{version}</info:version>")
}

pub fn upload_comment(record: &SystemRecord, options: &ImageOptions) -> String {
    format!(
        "{} neighboring systems ({}) (v{})",
        record.name, options.year, options.version
    )
}

pub fn caption_text(record: &SystemRecord) -> String {
    format!("{} [[#Nearby_Systems|nearby systems]]", record.name)
}

/// Body of the `File:` page: upload comment, linked neighbor list, legend, category.
pub fn file_description(
    record: &SystemRecord,
    all: &[SystemRecord],
    options: &ImageOptions,
) -> crate::error::Result<String> {
    let neighbors = neighbors_within(record, all, options.neighbor_radius)?;
    let mut description = format!("{}\n\n", upload_comment(record, options));
    if !neighbors.is_empty() {
        for neighbor in &neighbors {
            let label = match neighbor.remote_id.as_deref().filter(|id| !id.is_empty()) {
                Some(id) => format!("[[{id}|{}]]", neighbor.name),
                None => neighbor.name.clone(),
            };
            description.push_str(&format!("* {label} ({:.2} LY)\n", neighbor.distance));
        }
        description.push('\n');
    }
    description.push_str(MAP_LEGEND);
    description.push_str("\n\n");
    description.push_str(MAP_CATEGORY);
    Ok(description)
}

fn upload_if_needed<S: DocumentStore + ?Sized>(
    store: &S,
    image: &PreparedImage<'_>,
    all: &[SystemRecord],
    options: &ImageOptions,
    report: &mut ImageUpdateReport,
) -> Result<()> {
    let name = &image.asset.image_name;
    let description = match file_description(image.record, all, options) {
        Ok(description) => description,
        Err(error) => {
            log::warn!("{error}");
            report.failed += 1;
            report.push(image.asset.file_title(), "error", Some(error.to_string()));
            return Ok(());
        }
    };
    let metadata = store
        .asset_metadata(name)
        .with_context(|| format!("failed to check remote image {name}"))?;
    let Some(reason) = upload_reason(
        metadata.as_deref(),
        &options.version,
        options.force_comment_edit,
    ) else {
        log::info!("\t{name} already exists");
        return Ok(());
    };
    log::info!("\t{name} is {reason}, uploading");
    if options.pretend {
        report.push(image.asset.file_title(), "would-upload", Some(reason.to_string()));
        return Ok(());
    }

    store
        .upload_asset(name, &image.bytes, &upload_comment(image.record, options))
        .with_context(|| format!("failed to upload {name}"))?;
    store
        .save(&image.asset.file_title(), &description, DESCRIPTION_SUMMARY)
        .with_context(|| format!("failed to describe {name}"))?;
    report.uploaded.push(name.clone());
    report.push(image.asset.file_title(), "uploaded", Some(reason.to_string()));
    Ok(())
}

fn update_article<S: DocumentStore + ?Sized>(
    store: &S,
    image: &PreparedImage<'_>,
    options: &ImageOptions,
    report: &mut ImageUpdateReport,
) -> Result<()> {
    let record = image.record;
    let id = record.sarna_id.as_deref().unwrap_or_default();
    log::info!("Checking {}: {}", record.name, id);

    let Some(document) = resolve_document(store, id, options.max_redirects)? else {
        log::warn!("{}: missing article {id}", record.name);
        report.failed += 1;
        report.push(id, "error", Some("missing article".to_string()));
        return Ok(());
    };

    let updated = match patch_image_and_caption(
        &document.id,
        &document.body,
        &image.asset.image_name,
        &caption_text(record),
    ) {
        Ok(updated) => updated,
        Err(error) if error.is_record_level() => {
            log::warn!("{error}");
            report.failed += 1;
            report.push(&document.id, "error", Some(error.to_string()));
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    if updated == document.body {
        report.unchanged += 1;
        report.push(&document.id, "unchanged", None);
        return Ok(());
    }
    log::info!("{}", render_diff(&document.id, &document.body, &updated));
    if options.pretend {
        report.push(&document.id, "would-update", None);
        return Ok(());
    }
    store
        .save(&document.id, &updated, &options.summary)
        .with_context(|| format!("failed to save {}", document.id))?;
    report.updated += 1;
    report.push(&document.id, "updated", None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::error::PlanetError;
    use crate::records::parse_table;
    use crate::remote::tests::MockStore;

    const TABLE: &str = "001\tSol\t\t0\t0\t\thttps://www.sarna.net/wiki/Sol\n\
002\tTerra Nova\t\t3\t4\t\thttps://www.sarna.net/wiki/Terra%20Nova\n\
003\tFar\t\t500\t500\t\thttps://www.sarna.net/wiki/Far\n\
004\tQuiet\t\t10\t0\t\n";

    #[derive(Default)]
    struct MemoryAssets {
        files: BTreeMap<PathBuf, Vec<u8>>,
    }

    impl MemoryAssets {
        fn with(names: &[&str]) -> Self {
            let files = names
                .iter()
                .map(|name| {
                    (
                        Path::new("1.1.2").join("3151").join(name),
                        format!("<svg>{name}</svg>").into_bytes(),
                    )
                })
                .collect();
            Self { files }
        }
    }

    impl AssetStore for MemoryAssets {
        fn exists(&self, path: &Path) -> bool {
            self.files.contains_key(path)
        }

        fn read(&self, path: &Path) -> Result<Vec<u8>> {
            self.files
                .get(path)
                .cloned()
                .with_context(|| format!("no asset {}", path.display()))
        }
    }

    fn article(name: &str) -> String {
        format!(
            "{{{{InfoBoxSystem\n| name                = {name}\n| image               = Old.png\n| caption             = Old caption\n}}}}\n"
        )
    }

    fn options() -> ImageOptions {
        ImageOptions {
            version: "1.1.2".to_string(),
            year: 3151,
            pretend: false,
            skip_remote_check: true,
            force_comment_edit: false,
            neighbor_radius: 60.0,
            max_redirects: 10,
            summary: "update images".to_string(),
        }
    }

    fn all_assets() -> MemoryAssets {
        MemoryAssets::with(&["Sol_3151.svg", "Terra%20Nova_3151.svg", "Far_3151.svg"])
    }

    fn wiki() -> MockStore {
        let sol = article("Sol");
        let terra = article("Terra Nova");
        MockStore::with_pages(&[
            ("Sol", sol.as_str()),
            ("Terra Nova", "#REDIRECT [[Terra Nova (system)]]"),
            ("Terra_Nova_(system)", terra.as_str()),
            ("Far", "{{InfoBoxSystem\n| name = Far\n}}\n"),
        ])
    }

    #[test]
    fn missing_local_image_aborts_before_remote_calls() {
        let records = parse_table(TABLE);
        let store = wiki();
        let assets = MemoryAssets::with(&["Sol_3151.svg"]);
        let error = run_image_update(&store, &assets, &records, &records, &options())
            .expect_err("must abort");
        let message = error.to_string();
        assert!(message.contains("Terra%20Nova_3151.svg"));
        assert!(message.contains("Far_3151.svg"));
        assert!(store.fetches.lock().expect("fetches lock").is_empty());
    }

    #[test]
    fn articles_get_image_and_caption() {
        let records = parse_table(TABLE);
        let store = wiki();
        let report = run_image_update(&store, &all_assets(), &records, &records, &options())
            .expect("update");

        assert_eq!(report.updated, 2);
        assert_eq!(report.failed, 1);
        assert!(report.uploaded.is_empty());
        assert_eq!(
            store.page("Sol").expect("sol"),
            "{{InfoBoxSystem\n| name                = Sol\n| image               = Sol_3151.svg\n| caption             = Sol [[#Nearby_Systems|nearby systems]]\n}}\n"
        );
        let terra = store.page("Terra_Nova_(system)").expect("terra");
        assert!(terra.contains("| image               = Terra Nova_3151.svg\n"));

        let far = report
            .pages
            .iter()
            .find(|page| page.title == "Far")
            .expect("far result");
        assert_eq!(far.action, "error");
        assert!(far.detail.as_deref().unwrap_or_default().contains("image"));

        let quiet = report
            .pages
            .iter()
            .find(|page| page.title == "Quiet")
            .expect("quiet result");
        assert_eq!(quiet.action, "skipped");
        assert!(
            store
                .saved()
                .iter()
                .all(|(_, _, comment)| comment == "update images")
        );
    }

    #[test]
    fn missing_article_is_reported_per_record() {
        let records = parse_table(TABLE);
        let store = MockStore::with_pages(&[]);
        let assets = MemoryAssets::with(&["Sol_3151.svg"]);
        let report = run_image_update(&store, &assets, &records, &records[..1], &options())
            .expect("update");
        assert_eq!(report.failed, 1);
        assert_eq!(report.pages[0].title, "Sol");
        assert_eq!(report.pages[0].detail.as_deref(), Some("missing article"));
    }

    #[test]
    fn pretend_writes_nothing() {
        let records = parse_table(TABLE);
        let store = wiki();
        let report = run_image_update(
            &store,
            &all_assets(),
            &records,
            &records[..1],
            &ImageOptions {
                pretend: true,
                skip_remote_check: false,
                ..options()
            },
        )
        .expect("update");
        assert!(report.pretend);
        assert!(store.saved().is_empty());
        assert!(store.uploaded.lock().expect("uploaded lock").is_empty());
        let actions = report
            .pages
            .iter()
            .map(|page| page.action.as_str())
            .collect::<Vec<_>>();
        assert_eq!(actions, vec!["would-upload", "would-update"]);
    }

    #[test]
    fn uploads_missing_and_outdated_images_with_description() {
        let records = parse_table(TABLE);
        let store = wiki();
        store.assets.lock().expect("assets lock").insert(
            "Terra Nova_3151.svg".to_string(),
            "<info:version>1.1.1</info:version>".to_string(),
        );
        store.assets.lock().expect("assets lock").insert(
            "Far_3151.svg".to_string(),
            "<info:version>1.1.2</info:version>".to_string(),
        );
        let report = run_image_update(
            &store,
            &all_assets(),
            &records,
            &records,
            &ImageOptions {
                skip_remote_check: false,
                ..options()
            },
        )
        .expect("update");

        assert_eq!(report.uploaded, vec!["Sol_3151.svg", "Terra Nova_3151.svg"]);
        let uploaded = store.uploaded.lock().expect("uploaded lock").clone();
        assert_eq!(uploaded[0].2, "Sol neighboring systems (3151) (v1.1.2)");

        let description = store.page("File:Sol_3151.svg").expect("description");
        assert_eq!(
            description,
            "Sol neighboring systems (3151) (v1.1.2)\n\n\
* [[Terra Nova|Terra Nova]] (5.00 LY)\n\
* Quiet (10.00 LY)\n\n\
([[BattleTechWiki:Map Legend|Map Legend]])\n\n\
[[Category:System Maps]]"
        );
        assert!(store.page("File:Far_3151.svg").is_none());
    }

    #[test]
    fn unreadable_coordinates_skip_the_upload() {
        let records = parse_table(
            "001\tSol\t\t?\t0\t\thttps://www.sarna.net/wiki/Sol\n\
002\tTerra Nova\t\t3\t4\t\thttps://www.sarna.net/wiki/Terra%20Nova\n",
        );
        let store = wiki();
        let report = run_image_update(
            &store,
            &all_assets(),
            &records,
            &records[..1],
            &ImageOptions {
                skip_remote_check: false,
                ..options()
            },
        )
        .expect("update");

        assert!(report.uploaded.is_empty());
        assert!(store.uploaded.lock().expect("uploaded lock").is_empty());
        assert!(store.page("File:Sol_3151.svg").is_none());
        assert_eq!(report.failed, 1);
        let file_page = &report.pages[0];
        assert_eq!(file_page.title, "File:Sol_3151.svg");
        assert_eq!(file_page.action, "error");
        assert_eq!(
            file_page.detail.as_deref(),
            Some("Sol: cannot parse x value \"?\"")
        );
        assert_eq!(report.updated, 1);
    }

    #[test]
    fn upload_reasons() {
        assert_eq!(upload_reason(None, "1.1.2", false), Some("missing"));
        assert_eq!(upload_reason(Some(""), "1.1.2", false), Some("older version"));
        let current = version_tag("1.1.2");
        assert_eq!(upload_reason(Some(&current), "1.1.2", false), None);
        assert_eq!(
            upload_reason(Some(&current), "1.1.2", true),
            Some("forcing a comment update")
        );
    }

    #[test]
    fn redirect_loops_abort_the_run() {
        let records = parse_table(TABLE);
        let store = MockStore::with_pages(&[("Sol", "#REDIRECT [[Sol]]")]);
        let assets = MemoryAssets::with(&["Sol_3151.svg"]);
        let error = run_image_update(
            &store,
            &assets,
            &records,
            &records[..1],
            &ImageOptions {
                max_redirects: 2,
                ..options()
            },
        )
        .expect_err("loop");
        assert!(matches!(
            error.downcast_ref::<PlanetError>(),
            Some(PlanetError::RedirectLoop { .. })
        ));
    }
}
