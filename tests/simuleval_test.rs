use std::fs;
use std::path::Path;
use unitpack::config::{PrepConfig, Split};
use unitpack::npy;
use unitpack::pipeline;
use unitpack::simuleval;
use unitpack::units::DEFAULT_KEY_SUFFIXES;

fn prepare_manifest(root: &Path) -> std::path::PathBuf {
    let pair = root.join("de-en");
    let feats = pair.join("src_fbank80");
    fs::create_dir_all(&feats).unwrap();
    for id in ["u1", "u2"] {
        let data = npy::encode_f32(&[4, 80]).unwrap();
        fs::write(feats.join(format!("{}.npy", id)), data).unwrap();
    }
    fs::write(pair.join("test.tsv"), "u1\nu2\n").unwrap();
    fs::write(pair.join("test.km1000"), "u1|7 7 8\nu2.wav|9\n").unwrap();
    fs::write(
        pair.join("test.short.tsv"),
        "audio_id\tsrc_text\ttgt_text\nu1\tGuten Tag, Welt!\tGood day, world!\nu2\tJa.\tYes.\n",
    )
    .unwrap();

    let cfg = PrepConfig {
        dataset_root: root.to_path_buf(),
        lang_pairs: vec!["de-en".to_string()],
        splits: vec![Split::Test],
        ..PrepConfig::default()
    };
    let summary = pipeline::run(&cfg).unwrap();
    assert!(!summary.has_failures());
    pair.join("fbank2unit").join("test.tsv")
}

#[test]
fn test_reference_files_follow_wav_list_order() {
    let temp_dir = tempfile::tempdir().unwrap();
    let manifest = prepare_manifest(temp_dir.path());
    let wav_list = temp_dir.path().join("test.wav_list");
    fs::write(&wav_list, "/audio/u2.wav\n/audio/missing.wav\n/audio/u1.wav\n").unwrap();

    let src_out = temp_dir.path().join("simuleval").join("test.src");
    let report = simuleval::extract_src(&manifest, &wav_list, &src_out, DEFAULT_KEY_SUFFIXES).unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(report.missing, vec!["missing"]);
    assert_eq!(fs::read_to_string(&src_out).unwrap(), "ja\nguten tag welt\n");

    let unit_out = temp_dir.path().join("simuleval").join("test.unit");
    let report = simuleval::extract_units(&manifest, &wav_list, &unit_out, DEFAULT_KEY_SUFFIXES).unwrap();
    assert_eq!(report.written, 2);
    // reduction was off for this run
    assert_eq!(fs::read_to_string(&unit_out).unwrap(), "9\n7 7 8\n");
}

#[test]
fn test_missing_wav_list_is_reported() {
    let temp_dir = tempfile::tempdir().unwrap();
    let manifest = prepare_manifest(temp_dir.path());
    let result = simuleval::extract_src(
        &manifest,
        &temp_dir.path().join("absent.wav_list"),
        &temp_dir.path().join("out.src"),
        DEFAULT_KEY_SUFFIXES,
    );
    assert!(matches!(result, Err(unitpack::PrepError::MissingInputFile { .. })));
}
