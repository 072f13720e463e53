use crate::application::ports::{BlobStore, ComparatorOutcome, ImageComparator, ImageEncoder};
use crate::application::tree::TreeEntryResult;
use crate::application::*;
use crate::domain::*;
use crate::infra::db::Database;
use crate::infra::image::{ImageCodec, PixelComparator};
use crate::infra::storage::FsBlobStore;
use image::{Rgba, RgbaImage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    db: Database,
    blobs: Arc<FsBlobStore>,
    catalog: Catalog,
    processor: SnapshotProcessor,
    reviews: ReviewStateMachine,
}

fn orchestrator(blobs: Arc<dyn BlobStore>, comparator: Arc<dyn ImageComparator>) -> DiffOrchestrator {
    DiffOrchestrator::new(Arc::new(ImageCodec), comparator, Arc::new(ImageCodec), blobs)
}

fn harness_with(comparator: Arc<dyn ImageComparator>, settings: ComparisonSettings) -> Harness {
    let tmp = TempDir::new().unwrap();
    let db = Database::open_in_memory().unwrap();
    let blobs = Arc::new(FsBlobStore::new(tmp.path()).unwrap());
    let catalog = Catalog::new(db.clone(), blobs.clone(), Arc::new(ImageCodec), "main");
    let processor = SnapshotProcessor::new(
        db.clone(),
        blobs.clone(),
        orchestrator(blobs.clone(), comparator),
        settings,
    );
    let reviews = ReviewStateMachine::new(db.clone(), blobs.clone());
    Harness {
        _tmp: tmp,
        db,
        blobs,
        catalog,
        processor,
        reviews,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(PixelComparator), ComparisonSettings::default())
}

fn png(width: u32, height: u32, paint: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
    ImageCodec
        .encode(&RgbaImage::from_fn(width, height, |x, y| Rgba(paint(x, y))))
        .unwrap()
}

fn white() -> Vec<u8> {
    png(10, 10, |_, _| [255, 255, 255, 255])
}

/// White 10x10 with the top row black: 10% different from `white()`.
fn striped() -> Vec<u8> {
    png(10, 10, |_, y| {
        if y == 0 { [0, 0, 0, 255] } else { [255, 255, 255, 255] }
    })
}

fn upload(name: &str, image: Option<Vec<u8>>) -> SnapshotUpload {
    SnapshotUpload {
        snapshot: NewSnapshot {
            name: name.into(),
            width: Some(10),
            height: Some(10),
            ..NewSnapshot::default()
        },
        image,
    }
}

fn approve(by: &str) -> ReviewDecision {
    ReviewDecision {
        status: ReviewStatus::Approved,
        reviewed_by: by.into(),
    }
}

impl Harness {
    fn project(&self, slug: &str) -> Project {
        self.catalog
            .create_project(NewProject {
                name: slug.into(),
                slug: slug.into(),
                ..NewProject::default()
            })
            .unwrap()
    }

    fn build(&self, project: &Project, branch: &str) -> Build {
        self.catalog
            .create_build(NewBuild {
                project_id: project.id.clone(),
                branch: branch.into(),
                ..NewBuild::default()
            })
            .unwrap()
    }
}

#[tokio::test]
async fn test_first_upload_has_no_baseline() {
    let h = harness();
    let project = h.project("first");
    let build = h.build(&project, "main");

    let snap = h
        .processor
        .ingest(&build.id, upload("home", Some(white())))
        .await
        .unwrap();
    assert_eq!(snap.status, SnapshotStatus::Completed);
    assert_eq!(snap.baseline_id, None);
    assert_eq!(snap.diff_percentage, Some(0.0));
    assert!(snap.diff_image_path.is_none());
    assert!(snap.is_changed());

    let stats = h.catalog.build(&build.id).unwrap().stats;
    assert_eq!(stats.total_snapshots, 1);
    assert_eq!(stats.changed_snapshots, 0);
}

#[tokio::test]
async fn test_upload_without_image_stays_pending() {
    let h = harness();
    let project = h.project("pending");
    let build = h.build(&project, "main");

    let snap = h
        .processor
        .ingest(&build.id, upload("home", None))
        .await
        .unwrap();
    assert_eq!(snap.status, SnapshotStatus::Pending);
    assert!(snap.comparison_image_path.is_none());
}

#[tokio::test]
async fn test_approve_then_diff_against_promoted_baseline() {
    let h = harness();
    let project = h.project("shop");

    // Build #1: S1 uploaded and approved.
    let b1 = h.build(&project, "main");
    let s1 = h
        .processor
        .ingest(&b1.id, upload("home", Some(white())))
        .await
        .unwrap();
    let outcome = h.reviews.review(&s1.id, &approve("alice")).unwrap();
    let baseline = outcome.promoted.unwrap();
    assert_eq!(baseline.source_snapshot_id.as_deref(), Some(s1.id.as_str()));
    assert_eq!(outcome.snapshot.review_status, ReviewStatus::Approved);
    assert_eq!(outcome.snapshot.reviewed_by.as_deref(), Some("alice"));
    assert_eq!(h.catalog.build(&b1.id).unwrap().stats.approved_snapshots, 1);

    // The promoted baseline is resolvable right away and carries S1's image.
    let lookup = h.db.baseline_repo();
    let resolved = BaselineResolver::new(&lookup)
        .resolve(&project, "home", "main", None, None)
        .unwrap();
    assert_eq!(resolved.id, baseline.id);
    assert_eq!(h.blobs.get(&resolved.image_path).unwrap(), white());

    // Build #2: S2 differs in 10 of 100 pixels.
    let b2 = h.build(&project, "main");
    let s2 = h
        .processor
        .ingest(&b2.id, upload("home", Some(striped())))
        .await
        .unwrap();
    assert_eq!(s2.status, SnapshotStatus::Completed);
    assert_eq!(s2.baseline_id.as_deref(), Some(baseline.id.as_str()));
    assert_eq!(s2.base_image_path.as_deref(), Some(baseline.image_path.as_str()));
    assert!((s2.diff_percentage.unwrap() - 10.0).abs() < 1e-9);
    let artifact = s2.diff_image_path.clone().unwrap();
    assert!(h.blobs.get(&artifact).is_ok());

    let changed = h.catalog.changed_snapshots(&b2.id).unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(h.catalog.build(&b2.id).unwrap().stats.changed_snapshots, 1);
}

#[tokio::test]
async fn test_feature_branch_falls_back_to_default_branch_baseline() {
    let h = harness();
    let project = h.project("fallback");
    let main_build = h.build(&project, "main");
    let s1 = h
        .processor
        .ingest(&main_build.id, upload("home", Some(white())))
        .await
        .unwrap();
    h.reviews.review(&s1.id, &approve("alice")).unwrap();

    let feature = h.build(&project, "feature-x");
    let s2 = h
        .processor
        .ingest(&feature.id, upload("home", Some(white())))
        .await
        .unwrap();
    assert!(s2.baseline_id.is_some());
    assert_eq!(s2.diff_percentage, Some(0.0));

    // Approving on the feature branch creates a separate baseline.
    let promoted = h.reviews.review(&s2.id, &approve("bob")).unwrap().promoted.unwrap();
    assert_eq!(promoted.key.branch, "feature-x");
    assert_eq!(
        h.catalog
            .list_baselines(&project.id, None, Pagination::default())
            .unwrap()
            .total,
        2
    );
}

#[tokio::test]
async fn test_reapproval_replaces_baseline_image() {
    let h = harness();
    let project = h.project("again");
    let b1 = h.build(&project, "main");
    let s1 = h.processor.ingest(&b1.id, upload("home", Some(white()))).await.unwrap();
    let first = h.reviews.review(&s1.id, &approve("a")).unwrap().promoted.unwrap();

    let b2 = h.build(&project, "main");
    let s2 = h.processor.ingest(&b2.id, upload("home", Some(striped()))).await.unwrap();
    let second = h.reviews.review(&s2.id, &approve("a")).unwrap().promoted.unwrap();

    assert_eq!(first.id, second.id);
    assert_ne!(first.image_path, second.image_path);
    assert!(matches!(
        h.blobs.get(&first.image_path),
        Err(StorageError::NotFound(_))
    ));
    assert_eq!(h.blobs.get(&second.image_path).unwrap(), striped());
}

#[tokio::test]
async fn test_review_validation() {
    let h = harness();
    let project = h.project("rules");
    let build = h.build(&project, "main");
    let no_image = h.processor.ingest(&build.id, upload("blank", None)).await.unwrap();
    let with_image = h
        .processor
        .ingest(&build.id, upload("home", Some(white())))
        .await
        .unwrap();

    assert!(matches!(
        h.reviews.review(&with_image.id, &approve("  ")),
        Err(ReviewError::MissingReviewer)
    ));
    assert!(matches!(
        h.reviews.review(
            &with_image.id,
            &ReviewDecision {
                status: ReviewStatus::Unreviewed,
                reviewed_by: "a".into(),
            }
        ),
        Err(ReviewError::InvalidDecision(ReviewStatus::Unreviewed))
    ));
    assert!(matches!(
        h.reviews.review("missing", &approve("a")),
        Err(ReviewError::NotFound(_))
    ));
    assert!(matches!(
        h.reviews.review(&no_image.id, &approve("a")),
        Err(ReviewError::Promotion(
            BaselinePromotionError::MissingComparisonImage(_)
        ))
    ));
    // The failed approval left the snapshot untouched.
    let untouched = h.catalog.snapshot(&no_image.id).unwrap();
    assert_eq!(untouched.review_status, ReviewStatus::Unreviewed);

    // Rejecting needs no image, and a later approval overwrites it.
    let rejected = h
        .reviews
        .review(
            &with_image.id,
            &ReviewDecision {
                status: ReviewStatus::Rejected,
                reviewed_by: "carol".into(),
            },
        )
        .unwrap();
    assert!(rejected.promoted.is_none());
    assert_eq!(rejected.snapshot.review_status, ReviewStatus::Rejected);
    let approved = h.reviews.review(&with_image.id, &approve("dave")).unwrap();
    assert_eq!(approved.snapshot.reviewed_by.as_deref(), Some("dave"));
}

#[tokio::test]
async fn test_batch_review_skips_snapshot_without_image() {
    let h = harness();
    let project = h.project("batch");
    let build = h.build(&project, "main");
    let blank = h.processor.ingest(&build.id, upload("blank", None)).await.unwrap();
    let home = h
        .processor
        .ingest(&build.id, upload("home", Some(white())))
        .await
        .unwrap();

    let report = h
        .reviews
        .batch_review(
            &[blank.id.clone(), home.id.clone(), "missing".to_string()],
            &approve("alice"),
        )
        .unwrap();

    assert_eq!(report.reviewed, vec![home.id.clone()]);
    assert_eq!(report.promoted.len(), 1);
    assert_eq!(report.promoted[0].key.name, "home");
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.skipped[0].snapshot_id, blank.id);

    let lookup = h.db.baseline_repo();
    assert!(
        BaselineResolver::new(&lookup)
            .resolve(&project, "home", "main", None, None)
            .is_some()
    );
    assert_eq!(h.catalog.build(&build.id).unwrap().stats.approved_snapshots, 1);
}

#[tokio::test]
async fn test_batch_ingest_isolates_failures() {
    let h = harness();
    let project = h.project("many");
    let b1 = h.build(&project, "main");
    let s1 = h.processor.ingest(&b1.id, upload("broken", Some(white()))).await.unwrap();
    h.reviews.review(&s1.id, &approve("a")).unwrap();

    let b2 = h.build(&project, "main");
    let results = h
        .processor
        .ingest_batch(
            &b2.id,
            vec![
                upload("a", Some(white())),
                upload("broken", Some(b"not an image".to_vec())),
                upload("", Some(white())),
                upload("c", Some(striped())),
            ],
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().name, "a");
    let broken = results[1].as_ref().unwrap();
    assert_eq!(broken.status, SnapshotStatus::Failed);
    assert!(broken.comparison_image_path.is_some());
    assert!(matches!(results[2], Err(SnapshotError::Invalid(_))));
    assert_eq!(results[3].as_ref().unwrap().status, SnapshotStatus::Completed);

    let stats = h.catalog.build(&b2.id).unwrap().stats;
    assert_eq!(stats.total_snapshots, 3);
}

#[tokio::test]
async fn test_ingest_into_missing_build() {
    let h = harness();
    let err = h
        .processor
        .ingest("nope", upload("home", Some(white())))
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::BuildNotFound(_)));
}

struct SlowComparator;

impl ImageComparator for SlowComparator {
    fn compare(&self, _: &RgbaImage, _: &RgbaImage, _: f64, _: bool) -> ComparatorOutcome {
        std::thread::sleep(Duration::from_millis(500));
        ComparatorOutcome {
            equal: true,
            differing_pixels: 0,
            visual_diff: None,
        }
    }
}

#[tokio::test]
async fn test_comparison_timeout_marks_snapshot_failed() {
    let h = harness_with(
        Arc::new(SlowComparator),
        ComparisonSettings {
            timeout: Duration::from_millis(20),
            ..ComparisonSettings::default()
        },
    );
    let project = h.project("slow");
    let b1 = h.build(&project, "main");
    // No baseline yet, so the comparator is never called.
    let s1 = h.processor.ingest(&b1.id, upload("home", Some(white()))).await.unwrap();
    assert_eq!(s1.status, SnapshotStatus::Completed);
    h.reviews.review(&s1.id, &approve("a")).unwrap();

    let b2 = h.build(&project, "main");
    let s2 = h.processor.ingest(&b2.id, upload("home", Some(white()))).await.unwrap();
    assert_eq!(s2.status, SnapshotStatus::Failed);
    assert!(s2.comparison_image_path.is_some());
    assert!(s2.diff_percentage.is_none());
}

/// Reports every comparison as changed, after a delay.
struct SlowChangedComparator;

impl ImageComparator for SlowChangedComparator {
    fn compare(&self, base: &RgbaImage, _: &RgbaImage, _: f64, _: bool) -> ComparatorOutcome {
        std::thread::sleep(Duration::from_millis(300));
        ComparatorOutcome {
            equal: false,
            differing_pixels: 1,
            visual_diff: Some(RgbaImage::new(base.width(), base.height())),
        }
    }
}

#[tokio::test]
async fn test_timed_out_comparison_leaves_no_diff_artifact() {
    let h = harness_with(
        Arc::new(SlowChangedComparator),
        ComparisonSettings {
            timeout: Duration::from_millis(20),
            ..ComparisonSettings::default()
        },
    );
    let project = h.project("orphan");
    let b1 = h.build(&project, "main");
    let s1 = h.processor.ingest(&b1.id, upload("home", Some(white()))).await.unwrap();
    h.reviews.review(&s1.id, &approve("a")).unwrap();

    let b2 = h.build(&project, "main");
    let s2 = h.processor.ingest(&b2.id, upload("home", Some(striped()))).await.unwrap();
    assert_eq!(s2.status, SnapshotStatus::Failed);
    assert!(s2.diff_image_path.is_none());

    // Let the abandoned worker run to completion.
    tokio::time::sleep(Duration::from_millis(800)).await;
    let artifact = format!("{}/diffs/{}.png", project.id, s2.id);
    assert!(matches!(h.blobs.get(&artifact), Err(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_missing_baseline_file_counts_as_no_baseline() {
    let h = harness();
    let project = h.project("lost");
    let b1 = h.build(&project, "main");
    let s1 = h.processor.ingest(&b1.id, upload("home", Some(white()))).await.unwrap();
    let baseline = h.reviews.review(&s1.id, &approve("a")).unwrap().promoted.unwrap();
    h.blobs.delete(&baseline.image_path).unwrap();

    let b2 = h.build(&project, "main");
    let s2 = h.processor.ingest(&b2.id, upload("home", Some(striped()))).await.unwrap();
    assert_eq!(s2.status, SnapshotStatus::Completed);
    assert!(s2.baseline_id.is_none());
    assert_eq!(s2.diff_percentage, Some(0.0));
}

fn write(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn test_compare_trees_reports_every_entry() {
    let tmp = TempDir::new().unwrap();
    let (base, feature, diffs) = (
        tmp.path().join("base"),
        tmp.path().join("feature"),
        tmp.path().join("diff"),
    );
    write(&base, "same.png", &white());
    write(&feature, "same.png", &white());
    write(&base, "pages/home.png", &white());
    write(&feature, "pages/home.png", &striped());
    write(&base, "gone.png", &white());
    write(&feature, "pages/new.png", &white());
    write(&base, "corrupt.png", &white());
    write(&feature, "corrupt.png", b"garbage");

    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(tmp.path().join("blobs")).unwrap());
    let diff = orchestrator(blobs, Arc::new(PixelComparator));
    let report = compare_trees(&diff, &base, &feature, &diffs, &ComparisonSettings::default())
        .await
        .unwrap();

    assert_eq!(report.summary.unchanged, 1);
    assert_eq!(report.summary.changed, 1);
    assert_eq!(report.summary.added, 1);
    assert_eq!(report.summary.removed, 1);
    assert_eq!(report.summary.failed, 1);

    let changed = report
        .entries
        .iter()
        .find_map(|e| match &e.result {
            TreeEntryResult::Changed {
                diff_percentage,
                diff_path,
            } => Some((*diff_percentage, diff_path.clone())),
            _ => None,
        })
        .unwrap();
    assert!((changed.0 - 10.0).abs() < 1e-9);
    let written = changed.1.unwrap();
    assert_eq!(written, diffs.join("pages").join("home.png"));
    assert!(written.exists());
}

#[tokio::test]
async fn test_compare_trees_missing_root_aborts() {
    let tmp = TempDir::new().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(tmp.path()).unwrap());
    let diff = orchestrator(blobs, Arc::new(PixelComparator));
    let err = compare_trees(
        &diff,
        &tmp.path().join("nope"),
        tmp.path(),
        &tmp.path().join("diff"),
        &ComparisonSettings::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.path, tmp.path().join("nope"));
}

#[tokio::test]
async fn test_compare_trees_times_out_slow_pairs() {
    let tmp = TempDir::new().unwrap();
    let (base, feature, diffs) = (
        tmp.path().join("base"),
        tmp.path().join("feature"),
        tmp.path().join("diff"),
    );
    write(&base, "a.png", &white());
    write(&feature, "a.png", &striped());
    write(&feature, "b.png", &white());

    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(tmp.path().join("blobs")).unwrap());
    let diff = orchestrator(blobs, Arc::new(SlowChangedComparator));
    let settings = ComparisonSettings {
        timeout: Duration::from_millis(20),
        ..ComparisonSettings::default()
    };
    let report = compare_trees(&diff, &base, &feature, &diffs, &settings)
        .await
        .unwrap();

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.added, 1);
    let reason = report
        .entries
        .iter()
        .find_map(|e| match &e.result {
            TreeEntryResult::Failed { reason } => Some(reason.clone()),
            _ => None,
        })
        .unwrap();
    assert!(reason.contains("timed out"));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!diffs.exists());
}

#[tokio::test(flavor = "current_thread")]
async fn test_ingest_keeps_executor_free_while_database_is_busy() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let h = harness();
    let project = h.project("busy");
    let build = h.build(&project, "main");

    let conn = h.db.connection();
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let holder = std::thread::spawn(move || {
        let _guard = conn.lock();
        locked_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(200));
    });
    locked_rx.recv().unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let snapshot = h
        .processor
        .ingest(&build.id, upload("home", Some(white())))
        .await
        .unwrap();
    ticker.abort();
    holder.join().unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Completed);
    // The single executor thread kept running other tasks while ingest waited on the lock.
    assert!(ticks.load(Ordering::SeqCst) >= 5);
}
