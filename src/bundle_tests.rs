use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::builder::Builder;
use crate::bundle::{read_lock, META_ARTIFACT, SCRIPT_ARTIFACT, STYLE_ARTIFACT};
use crate::config::BuilderConfig;
use crate::error::BuildError;
use crate::watch::WatchScheduler;

fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

/// Two bundles; Admin includes UI, and UI's Secret module excludes Admin.
fn project() -> (TempDir, BuilderConfig) {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write(
        root,
        "UI/Source/Start/Start.js",
        "import { greet } from 'UI/Greet';\ngreet('x');\n",
    );
    write(
        root,
        "UI/Source/Greet/Greet.js",
        "export function greet(name) { return `Hi ${name}`; }\n",
    );
    write(
        root,
        "UI/Source/Greet/Greet.scss",
        ".greet { color: $brand; background: url(./img/Bg.png); }\n",
    );
    write(root, "UI/Source/Greet/img/Bg.png", "png");
    write(root, "UI/Source/Theme/Theme.global.scss", "// brand\n$brand: #123456;\n");
    write(root, "UI/Source/Secret/Secret.js", "export default 1;\n");
    write(root, "UI/Source/Secret/module.json", r#"{ "exclude": ["admin"] }"#);
    write(root, "Admin/Source/Panel/Panel.js", "export default 2;\n");

    let mut config = BuilderConfig::new(root, &["UI", "Admin"]);
    config.cache_dir = Some(root.join("cache"));
    config.out_dir = Some(root.join("out"));
    config
        .include
        .insert("Admin".to_string(), vec!["UI".to_string()]);
    (dir, config)
}

fn artifact(dir: &TempDir, bundle: &str, name: &str) -> String {
    fs::read_to_string(dir.path().join("out").join(bundle).join(name)).unwrap()
}

#[test]
fn test_build_writes_all_artifacts() {
    let (dir, config) = project();
    let summaries = Builder::new(config).unwrap().build().unwrap();
    assert_eq!(summaries.len(), 2);

    let js = artifact(&dir, "ui", SCRIPT_ARTIFACT);
    assert!(js.starts_with("var __mm = window.__mm"), "{}", js);
    assert!(js.contains("__mm[\"ui/greet/greet\"] = function"), "{}", js);
    assert!(js.contains("var greet = _rq(\"ui/greet/greet\").greet;"), "{}", js);
    assert!(js.ends_with("_rq(\"ui/start/start\");\n"), "{}", js);

    let css = artifact(&dir, "ui", STYLE_ARTIFACT);
    assert!(css.contains("#123456"), "{}", css);
    assert!(css.contains("url(/ui/static/greet/img/bg.png)"), "{}", css);
    assert!(!css.contains("$brand"), "{}", css);

    let copied = dir.path().join("out/ui/static/greet/img/bg.png");
    assert_eq!(fs::read_to_string(copied).unwrap(), "png");
}

#[test]
fn test_meta_records_modules_and_templates() {
    let (dir, config) = project();
    Builder::new(config).unwrap().build().unwrap();

    let js = artifact(&dir, "ui", SCRIPT_ARTIFACT);
    let meta: serde_json::Value =
        serde_json::from_str(&artifact(&dir, "ui", META_ARTIFACT)).unwrap();

    assert!(meta["compileTime"].as_u64().unwrap() > 0);
    let range = &meta["modules"]["UI/Greet/Greet.js"];
    let start = range["start"].as_u64().unwrap() as usize;
    let end = range["end"].as_u64().unwrap() as usize;
    assert!(js[start..end].starts_with("__mm[\"ui/greet/greet\"]"));

    let templates = meta["templates"].as_array().unwrap();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0]["original"], "Hi ${name}");
    assert_eq!(templates[0]["module"], "UI/Greet/Greet.js");
    assert_eq!(templates[0]["variableMap"]["name"], "name");
}

#[test]
fn test_include_respects_module_exclusions() {
    let (dir, config) = project();
    Builder::new(config).unwrap().build().unwrap();

    let ui = artifact(&dir, "ui", SCRIPT_ARTIFACT);
    let admin = artifact(&dir, "admin", SCRIPT_ARTIFACT);

    assert!(ui.contains("__mm[\"ui/secret/secret\"]"));
    assert!(!admin.contains("ui/secret/secret"), "{}", admin);
    assert!(admin.contains("__mm[\"ui/greet/greet\"]"));
    assert!(admin.contains("__mm[\"admin/panel/panel\"]"));
    // Admin has no Start module of its own.
    assert!(!admin.ends_with("_rq(\"admin/start/start\");\n"));

    let admin_css = artifact(&dir, "admin", STYLE_ARTIFACT);
    assert!(admin_css.contains(".greet"), "{}", admin_css);
}

#[test]
fn test_warm_build_is_all_cache_hits_and_identical() {
    let (dir, config) = project();
    let cold = Builder::new(config.clone()).unwrap().build().unwrap();
    assert!(cold.iter().all(|s| s.cache_hits == 0));
    assert_eq!(cold.iter().map(|s| s.transformed).sum::<usize>(), 5);

    let cold_js = artifact(&dir, "ui", SCRIPT_ARTIFACT);
    let cold_css = artifact(&dir, "ui", STYLE_ARTIFACT);
    let cold_admin = artifact(&dir, "admin", SCRIPT_ARTIFACT);
    assert!(dir.path().join("cache/build-cache.json").exists());

    let warm = Builder::new(config).unwrap().build().unwrap();
    assert_eq!(warm.iter().map(|s| s.transformed).sum::<usize>(), 0);
    assert_eq!(warm.iter().map(|s| s.cache_hits).sum::<usize>(), 5);

    assert_eq!(artifact(&dir, "ui", SCRIPT_ARTIFACT), cold_js);
    assert_eq!(artifact(&dir, "ui", STYLE_ARTIFACT), cold_css);
    assert_eq!(artifact(&dir, "admin", SCRIPT_ARTIFACT), cold_admin);
}

#[test]
fn test_global_change_invalidates_cached_stylesheets() {
    let (dir, config) = project();
    Builder::new(config.clone()).unwrap().build().unwrap();

    write(
        dir.path(),
        "UI/Source/Theme/Theme.global.scss",
        "$brand: #abcdef; // changed\n",
    );
    let summaries = Builder::new(config).unwrap().build().unwrap();
    let ui = summaries.iter().find(|s| s.bundle == "UI").unwrap();
    assert_eq!(ui.transformed, 1);
    assert!(artifact(&dir, "ui", STYLE_ARTIFACT).contains("#abcdef"));
}

#[test]
fn test_failed_file_is_stubbed_and_reported() {
    let (dir, mut config) = project();
    write(dir.path(), "UI/Source/Broken/Broken.js", "export function (\n");

    let err = Builder::new(config.clone()).unwrap().build().unwrap_err();
    match err {
        BuildError::Failed(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].bundle, "UI");
            assert_eq!(errors[0].module_path, "UI/Broken/Broken.js");
        }
        other => panic!("unexpected error: {}", other),
    }

    let js = artifact(&dir, "ui", SCRIPT_ARTIFACT);
    assert!(js.contains("__mm[\"ui/broken/broken\"]"));
    assert!(js.contains("Failed to build UI/Broken/Broken.js"));
    assert!(js.contains("__mm[\"ui/greet/greet\"]"));

    // Errors are not cached, so a warm build reports them again.
    config.degrade_errors = true;
    let summaries = Builder::new(config).unwrap().build().unwrap();
    let ui = summaries.iter().find(|s| s.bundle == "UI").unwrap();
    assert_eq!(ui.errors, 1);
    assert_eq!(ui.transformed, 1);
}

#[test]
fn test_stylesheet_error_becomes_comment() {
    let (dir, mut config) = project();
    config.degrade_errors = true;
    write(dir.path(), "UI/Source/Bad/Bad.scss", ".bad { color: $nope; }\n");

    Builder::new(config).unwrap().build().unwrap();
    let css = artifact(&dir, "ui", STYLE_ARTIFACT);
    assert!(css.contains("/* SCSS error in UI/Bad/Bad.scss"), "{}", css);
    assert!(css.contains("#123456"), "{}", css);
}

#[test]
fn test_missing_source_directory_builds_empty() {
    let dir = TempDir::new().unwrap();
    let mut config = BuilderConfig::new(dir.path(), &["Email"]);
    config.out_dir = Some(dir.path().join("out"));

    let summaries = Builder::new(config).unwrap().build().unwrap();
    assert_eq!(summaries[0].scripts, 0);
    let js = artifact(&dir, "email", SCRIPT_ARTIFACT);
    assert!(js.starts_with("var __mm"));
}

#[test]
fn test_static_copy_is_skipped_when_current() {
    let (_dir, config) = project();
    let builder = Builder::new(config).unwrap();
    builder.build().unwrap();

    let ui = read_lock(builder.bundle("UI").unwrap());
    assert_eq!(ui.statics().len(), 1);
    assert_eq!(ui.copy_static_assets(), 0);
}

#[test]
fn test_compress_writes_gzip_siblings() {
    let (dir, mut config) = project();
    config.compress = true;
    Builder::new(config).unwrap().build().unwrap();

    let gz = dir.path().join("out/ui").join(format!("{}.gz", SCRIPT_ARTIFACT));
    let bytes = fs::read(gz).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// WATCH
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_delete_triggers_one_debounced_rebuild() {
    let (dir, config) = project();
    let builder = Builder::new(config).unwrap();
    builder.build().unwrap();

    let secret = dir.path().join("UI/Source/Secret/Secret.js");
    fs::remove_file(&secret).unwrap();

    let mut scheduler = WatchScheduler::new(&builder);
    let now = Instant::now();
    scheduler.handle_path("UI", &secret, now);
    scheduler.handle_path("UI", &secret, now + Duration::from_millis(10));

    assert!(scheduler.fire_due(now + Duration::from_millis(50)).is_empty());

    let fired = scheduler.fire_due(now + Duration::from_millis(250));
    assert_eq!(fired.iter().filter(|s| s.bundle == "UI").count(), 1);
    assert!(scheduler.fire_due(now + Duration::from_millis(500)).is_empty());

    let ui = read_lock(builder.bundle("UI").unwrap());
    assert!(!ui.files().contains_key("UI/Secret/Secret.js"));
    drop(ui);
    assert!(!artifact(&dir, "ui", SCRIPT_ARTIFACT).contains("ui/secret/secret"));
}

#[test]
fn test_change_cascades_to_including_bundle() {
    let (dir, config) = project();
    let builder = Builder::new(config).unwrap();
    builder.build().unwrap();

    let greet = write(
        dir.path(),
        "UI/Source/Greet/Greet.js",
        "export function greet(name) { return `Hello again ${name}`; }\n",
    );

    let mut scheduler = WatchScheduler::new(&builder);
    let now = Instant::now();
    scheduler.handle_path("UI", &greet, now);
    let fired = scheduler.fire_due(now + Duration::from_millis(250));

    let bundles: Vec<&str> = fired.iter().map(|s| s.bundle.as_str()).collect();
    assert_eq!(bundles, vec!["UI", "Admin"]);
    assert!(artifact(&dir, "ui", SCRIPT_ARTIFACT).contains("Hello again"));
    assert!(artifact(&dir, "admin", SCRIPT_ARTIFACT).contains("Hello again"));
}

#[test]
fn test_global_edit_while_watching_recompiles_styles() {
    let (dir, config) = project();
    let builder = Builder::new(config).unwrap();
    builder.build().unwrap();

    let theme = write(
        dir.path(),
        "UI/Source/Theme/Theme.global.scss",
        "$brand: #fedcba;\n",
    );

    let mut scheduler = WatchScheduler::new(&builder);
    let now = Instant::now();
    scheduler.handle_path("UI", &theme, now);
    scheduler.fire_due(now + Duration::from_millis(250));

    assert!(artifact(&dir, "ui", STYLE_ARTIFACT).contains("#fedcba"));
    assert!(artifact(&dir, "admin", STYLE_ARTIFACT).contains("#fedcba"));
}

#[test]
fn test_new_directory_is_scanned() {
    let (dir, config) = project();
    let builder = Builder::new(config).unwrap();
    builder.build().unwrap();

    write(dir.path(), "UI/Source/Fresh/Fresh.js", "export default 3;\n");

    let mut scheduler = WatchScheduler::new(&builder);
    let now = Instant::now();
    scheduler.handle_path("UI", &dir.path().join("UI/Source/Fresh"), now);
    scheduler.fire_due(now + Duration::from_millis(250));

    assert!(artifact(&dir, "ui", SCRIPT_ARTIFACT).contains("__mm[\"ui/fresh/fresh\"]"));
}

#[test]
fn test_changes_under_ignored_directories_are_skipped() {
    let (dir, config) = project();
    let builder = Builder::new(config).unwrap();
    builder.build().unwrap();

    let skipped = write(dir.path(), "UI/Source/ignore/Skip.js", "export default 4;\n");
    write(
        dir.path(),
        "UI/Source/Fresh/node_modules/dep/dep.js",
        "export default 5;\n",
    );
    write(dir.path(), "UI/Source/Fresh/Fresh.js", "export default 3;\n");

    let mut scheduler = WatchScheduler::new(&builder);
    let now = Instant::now();
    scheduler.handle_path("UI", &skipped, now);
    scheduler.handle_path("UI", &dir.path().join("UI/Source/Fresh"), now);
    scheduler.fire_due(now + Duration::from_millis(250));

    let ui = read_lock(builder.bundle("UI").unwrap());
    assert!(!ui.files().contains_key("UI/ignore/Skip.js"));
    drop(ui);

    let js = artifact(&dir, "ui", SCRIPT_ARTIFACT);
    assert!(!js.contains("ui/ignore/skip"), "{}", js);
    assert!(!js.contains("ui/fresh/node_modules"), "{}", js);
    assert!(js.contains("__mm[\"ui/fresh/fresh\"]"), "{}", js);
}

#[test]
fn test_removing_first_party_restores_third_party() {
    let (dir, config) = project();
    write(
        dir.path(),
        "UI/Source/ThirdParty/Greet/Greet.js",
        "export function greet(name) { return 'vendor ' + name; }\n",
    );
    let builder = Builder::new(config).unwrap();
    builder.build().unwrap();
    assert!(!artifact(&dir, "ui", SCRIPT_ARTIFACT).contains("vendor "));

    let greet = dir.path().join("UI/Source/Greet/Greet.js");
    fs::remove_file(&greet).unwrap();

    let mut scheduler = WatchScheduler::new(&builder);
    let now = Instant::now();
    scheduler.handle_path("UI", &greet, now);
    scheduler.fire_due(now + Duration::from_millis(250));

    let ui = read_lock(builder.bundle("UI").unwrap());
    assert!(ui.files()["UI/Greet/Greet.js"].third_party);
    drop(ui);
    assert!(artifact(&dir, "ui", SCRIPT_ARTIFACT).contains("vendor "));
}
