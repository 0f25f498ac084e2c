use super::{read, setup_mock_wan2gp, write, CLIP_PY, T5_PY, VAE_PY, WGP_PY};
use wan2gp_patcher::backup::{backup_path, restore, RestoreOutcome};
use wan2gp_patcher::config::{
    apply_patches, check_patches, load_builtin, FileOutcome, RuleStatus, RunReport,
};

const SUFFIX: &str = ".rtx5090_backup";

fn outcome<'a>(report: &'a RunReport, file: &str) -> &'a FileOutcome {
    let entry = report
        .files
        .iter()
        .find(|f| f.file == file)
        .unwrap_or_else(|| panic!("no report for {file}"));
    entry
        .result
        .as_ref()
        .unwrap_or_else(|e| panic!("{file} failed: {e}"))
}

#[test]
fn first_run_patches_every_file() {
    let ws = setup_mock_wan2gp();
    let config = load_builtin().unwrap();

    let report = apply_patches(&config, ws.path()).unwrap();
    assert!(!report.aborted);
    assert_eq!(report.files.len(), 4);
    for file in ["wgp.py", "wan/modules/t5.py", "wan/modules/clip.py", "wan/modules/vae.py"] {
        assert!(
            matches!(outcome(&report, file), FileOutcome::Modified { backup: Some(_), .. }),
            "{file} should be modified"
        );
    }

    let wgp = read(ws.path(), "wgp.py");
    assert!(wgp.contains(r#""vace_1.3B", "vace_multitalk_14B""#));
    assert!(wgp.contains(r#"help="Percentage of RAM allocated to Reserved RAM""#));
    assert!(wgp.contains("if trans2 is not None: offload.unload_loras_from_model(trans2)"));
    // The first unload line was never a target
    assert!(wgp.contains("if trans is not None: offload.unload_loras_from_model(trans)\n"));
    assert!(!wgp.contains("if trans is not None: offload.unload_loras_from_model(trans2)"));

    // Compile guard sits directly under the anchor line
    let anchor = "compile = server_config.get(\"compile\", \"\")\n";
    let after_anchor = &wgp[wgp.find(anchor).unwrap() + anchor.len()..];
    assert!(after_anchor.starts_with("# RTX 5090 specific"));
    assert!(after_anchor.contains("pass\n\nvae_config = "));

    let t5 = read(ws.path(), "wan/modules/t5.py");
    assert!(t5.contains("logging.warning(\"Meta tensor issue detected in T5"));
    assert!(t5.contains("\n        try:\n            offload.load_model_data(model, checkpoint_path, writable_tensors=True)\n"));
    assert!(!t5.contains("writable_tensors= False"));
    assert!(t5.ends_with("                raise\n        self.model = model\n"));

    let clip = read(ws.path(), "wan/modules/clip.py");
    assert!(clip.contains("self.model = self.model.to_empty(device=self.device)"));
    assert!(clip.contains("#     torch.load(checkpoint_path, map_location='cpu'), assign= True)"));

    let vae = read(ws.path(), "wan/modules/vae.py");
    assert!(vae.contains("Meta tensor issue detected in VAE"));
    // Commented-out loader line is left alone
    assert!(vae.contains(
        "# offload.load_model_data(model, pretrained_path.replace(\".pth\", \"_bf16.safetensors\"), writable_tensors= False)"
    ));
}

#[test]
fn backups_hold_pristine_originals() {
    let ws = setup_mock_wan2gp();
    let config = load_builtin().unwrap();
    apply_patches(&config, ws.path()).unwrap();

    for (file, original) in [
        ("wgp.py", WGP_PY),
        ("wan/modules/t5.py", T5_PY),
        ("wan/modules/clip.py", CLIP_PY),
        ("wan/modules/vae.py", VAE_PY),
    ] {
        let backup = backup_path(&ws.path().join(file), SUFFIX);
        assert_eq!(std::fs::read_to_string(backup).unwrap(), original);
    }
}

#[test]
fn second_run_reports_everything_applied() {
    let ws = setup_mock_wan2gp();
    let config = load_builtin().unwrap();

    apply_patches(&config, ws.path()).unwrap();
    let after_first = read(ws.path(), "wgp.py");

    let report = apply_patches(&config, ws.path()).unwrap();
    for entry in &report.files {
        let outcome = entry.result.as_ref().unwrap();
        let FileOutcome::Unchanged { plan } = outcome else {
            panic!("{} should be unchanged, got {outcome}", entry.file);
        };
        for rule in &plan.rules {
            assert_eq!(rule.status, RuleStatus::AlreadyApplied, "rule {}", rule.id);
        }
    }
    assert_eq!(read(ws.path(), "wgp.py"), after_first);
}

#[test]
fn missing_modules_are_skipped() {
    let ws = tempfile::TempDir::new().unwrap();
    write(ws.path(), "wgp.py", WGP_PY);
    let config = load_builtin().unwrap();

    let report = apply_patches(&config, ws.path()).unwrap();

    assert!(matches!(outcome(&report, "wgp.py"), FileOutcome::Modified { .. }));
    for file in ["wan/modules/t5.py", "wan/modules/clip.py", "wan/modules/vae.py"] {
        assert!(matches!(outcome(&report, file), FileOutcome::NotFound));
        assert!(!backup_path(&ws.path().join(file), SUFFIX).exists());
    }
}

#[test]
fn drifted_upstream_line_is_reported_with_hint() {
    let ws = setup_mock_wan2gp();
    let drifted = WGP_PY.replace(
        "help=\"% of RAM allocated to Reserved RAM\"",
        "help=\"% of RAM allocated to reserved RAM\"",
    );
    write(ws.path(), "wgp.py", &drifted);
    let config = load_builtin().unwrap();

    let report = check_patches(&config, ws.path()).unwrap();
    let plan = outcome(&report, "wgp.py").plan().unwrap();
    let rule = plan
        .rules
        .iter()
        .find(|r| r.id == "reserved-ram-help")
        .unwrap();

    match &rule.status {
        RuleStatus::TargetMissing { hint: Some(hint) } => {
            assert!(hint.text.contains("reserved RAM"));
            assert_eq!(hint.line, 13);
        }
        other => panic!("expected stale target with hint, got {other:?}"),
    }
}

#[test]
fn restore_round_trip() {
    let ws = setup_mock_wan2gp();
    let config = load_builtin().unwrap();
    apply_patches(&config, ws.path()).unwrap();

    for file in config.target_files() {
        let path = ws.path().join(file);
        let outcome = restore(&path, SUFFIX).unwrap();
        assert!(matches!(outcome, RestoreOutcome::Restored { .. }));
        assert!(!backup_path(&path, SUFFIX).exists());
    }

    assert_eq!(read(ws.path(), "wgp.py"), WGP_PY);
    assert_eq!(read(ws.path(), "wan/modules/vae.py"), VAE_PY);

    // A fresh run backs up again and patches again
    let report = apply_patches(&config, ws.path()).unwrap();
    assert!(matches!(
        outcome(&report, "wgp.py"),
        FileOutcome::Modified { backup: Some(wan2gp_patcher::BackupOutcome::Created { .. }), .. }
    ));
}

#[test]
fn fixed_vace_pair_does_not_mask_a_broken_one() {
    let ws = setup_mock_wan2gp();
    let mixed = WGP_PY.replace(
        "comp_map = {",
        "families = [\"vace_1.3B\", \"vace_multitalk_14B\"]\ncomp_map = {",
    );
    write(ws.path(), "wgp.py", &mixed);
    let config = load_builtin().unwrap();

    let report = apply_patches(&config, ws.path()).unwrap();

    let plan = outcome(&report, "wgp.py").plan().unwrap();
    let rule = plan
        .rules
        .iter()
        .find(|r| r.id == "vace-comp-map-comma")
        .unwrap();
    assert_eq!(rule.status, RuleStatus::Applied);

    let wgp = read(ws.path(), "wgp.py");
    assert!(!wgp.contains(r#""vace_1.3B" "vace_multitalk_14B""#));
    assert_eq!(wgp.matches(r#""vace_1.3B", "vace_multitalk_14B""#).count(), 2);
}
