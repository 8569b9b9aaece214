//! End-to-end pipeline tests over documents built in memory and a
//! self-signed certificate generated at test time.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use lopdf::{
    content::{Content, Operation},
    dictionary, Dictionary, Document, Object, Stream,
};
use openssl::{
    asn1::Asn1Time,
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{X509Builder, X509NameBuilder, X509},
};

use truecopy::{
    config::{PipelineConfig, RevocationPolicy},
    fetch::LocalFetcher,
    publish::DirectoryPublisher,
    signing::SigningMaterial,
    types::{RequestStatus, SigningRequest, SourceLocator},
    Pipeline,
};

fn write_sample_pdf(path: &Path) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => Vec::<Object>::new(),
        "Count" => 0,
    });
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal("Order of the Court")]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        },
        "Contents" => content_id,
    });
    {
        let pages = doc
            .get_object_mut(pages_id)
            .and_then(|o| o.as_dict_mut())
            .unwrap();
        pages
            .get_mut(b"Kids")
            .and_then(|o| o.as_array_mut())
            .unwrap()
            .push(Object::Reference(page_id));
        pages.set("Count", 1);
    }
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

fn self_signed_material() -> Arc<SigningMaterial> {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let cert = self_signed_cert(&key);
    SigningMaterial::from_parts(key, cert, vec![])
}

fn self_signed_cert(key: &PKey<Private>) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "Test Registry").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn test_config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.scratch_root = dir.join("scratch");
    config.publish_root = dir.join("published");
    config.encryption.owner_password = "registry-secret".into();
    config
}

fn test_pipeline(config: PipelineConfig) -> Pipeline {
    let publisher = Arc::new(DirectoryPublisher::new(
        config.publish_root.clone(),
        config.public_base.clone(),
    ));
    Pipeline::with_collaborators(config, self_signed_material(), Arc::new(LocalFetcher), publisher)
        .unwrap()
}

fn scratch_is_empty(root: &Path) -> bool {
    match std::fs::read_dir(root) {
        Ok(entries) => entries.count() == 0,
        Err(_) => true,
    }
}

#[tokio::test]
async fn end_to_end_produces_the_expected_artifact() {
    let dir = std::env::temp_dir().join("truecopy-e2e");
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("filing.pdf");
    write_sample_pdf(&input);

    let config = test_config(&dir);
    let public_base = config.public_base.clone();
    let publish_root = config.publish_root.clone();
    let scratch_root = config.scratch_root.clone();
    let pipeline = test_pipeline(config);

    let request = SigningRequest::new(
        SourceLocator::Path(input),
        "DLHC010001092024",
        "12345",
    );
    let result = pipeline.process(request).await;

    assert_eq!(result.status, RequestStatus::Completed);
    assert_eq!(
        result.output_locator.as_deref(),
        Some(format!("{}/DLHC010001092024-orderno-12345.pdf", public_base).as_str())
    );

    let published = publish_root.join("DLHC010001092024-orderno-12345.pdf");
    let bytes = std::fs::read(&published).unwrap();
    assert!(bytes.starts_with(b"%PDF-"));

    // Signature field embedded with the ByteRange sentinels patched out.
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("adbe.pkcs7.detached"));
    assert!(text.contains("/ByteRange"));
    assert!(!text.contains("9999999999"));
    // Encryption dictionary installed.
    assert!(text.contains("AESV2"));

    assert!(scratch_is_empty(&scratch_root));
}

#[tokio::test]
async fn signature_field_strings_are_encrypted_like_the_rest_of_the_file() {
    let dir = std::env::temp_dir().join("truecopy-sig-strings");
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("filing.pdf");
    write_sample_pdf(&input);

    let config = test_config(&dir);
    let publish_root = config.publish_root.clone();
    let pipeline = test_pipeline(config);

    let request = SigningRequest::new(SourceLocator::Path(input), "CASE55", "4");
    let result = pipeline.process(request).await;
    assert_eq!(result.status, RequestStatus::Completed);

    let bytes = std::fs::read(publish_root.join("CASE55-orderno-4.pdf")).unwrap();
    let text = String::from_utf8_lossy(&bytes);

    // /StrF declares string encryption for the whole file; the signature
    // dictionary's strings are not exempt, only /Contents is.
    assert!(text.contains("/StrF"));
    assert!(text.contains("AESV2"));
    assert!(!text.contains("Certified true copy"));
    assert!(!text.contains("Court Records Custodian"));
    assert!(!text.contains("TrueCopySignature"));
}

#[tokio::test]
async fn reprocessing_overwrites_the_same_artifact_name() {
    let dir = std::env::temp_dir().join("truecopy-idempotent");
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("filing.pdf");
    write_sample_pdf(&input);

    let config = test_config(&dir);
    let publish_root = config.publish_root.clone();
    let pipeline = test_pipeline(config);

    for _ in 0..2 {
        let request =
            SigningRequest::new(SourceLocator::Path(input.clone()), "CASE77", "9");
        let result = pipeline.process(request).await;
        assert_eq!(result.status, RequestStatus::Completed);
    }

    let published: Vec<_> = std::fs::read_dir(&publish_root)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(published, vec!["CASE77-orderno-9.pdf"]);
}

#[tokio::test]
async fn chain_failure_is_tagged_and_never_published() {
    let dir = std::env::temp_dir().join("truecopy-chain-failure");
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("filing.pdf");
    write_sample_pdf(&input);

    let mut config = test_config(&dir);
    config.signature.revocation = RevocationPolicy::CrlCheck;
    let publish_root = config.publish_root.clone();
    let scratch_root = config.scratch_root.clone();
    let pipeline = test_pipeline(config);

    let request = SigningRequest::new(SourceLocator::Path(input), "CASE1", "1");
    let result = pipeline.process(request).await;

    match result.status {
        RequestStatus::Failed { stage, .. } => assert_eq!(stage, "chain_build"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(result.output_locator.is_none());
    assert!(!publish_root.join("CASE1-orderno-1.pdf").exists());
    assert!(scratch_is_empty(&scratch_root));
}

#[tokio::test]
async fn unreadable_input_fails_at_document_read() {
    let dir = std::env::temp_dir().join("truecopy-bad-input");
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("garbage.pdf");
    std::fs::write(&input, b"this is not a pdf").unwrap();

    let config = test_config(&dir);
    let scratch_root = config.scratch_root.clone();
    let pipeline = test_pipeline(config);

    let request = SigningRequest::new(SourceLocator::Path(input), "CASE2", "2");
    let result = pipeline.process(request).await;

    match result.status {
        RequestStatus::Failed { stage, .. } => assert_eq!(stage, "document_read"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(scratch_is_empty(&scratch_root));
}

#[tokio::test]
async fn missing_source_fails_at_fetch() {
    let dir = std::env::temp_dir().join("truecopy-missing-source");
    std::fs::create_dir_all(&dir).unwrap();

    let pipeline = test_pipeline(test_config(&dir));
    let request = SigningRequest::new(
        SourceLocator::Path(PathBuf::from("/nonexistent/filing.pdf")),
        "CASE3",
        "3",
    );
    let result = pipeline.process(request).await;

    match result.status {
        RequestStatus::Failed { stage, .. } => assert_eq!(stage, "fetch"),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn missing_bundle_fails_pipeline_construction() {
    let dir = std::env::temp_dir().join("truecopy-missing-bundle");
    std::fs::create_dir_all(&dir).unwrap();

    let mut config = test_config(&dir);
    config.signature.bundle_path = dir.join("absent.p12");
    config.signature.password_env = "TRUECOPY_INTEGRATION_UNSET".into();
    assert!(Pipeline::new(config).is_err());
}

#[tokio::test]
async fn gate_bounds_concurrent_execution() {
    let dir = std::env::temp_dir().join("truecopy-gate-bound");
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("filing.pdf");
    write_sample_pdf(&input);

    let permits = 2;
    let mut config = test_config(&dir);
    config.gate.permits = permits;
    let pipeline = Arc::new(test_pipeline(config));

    let mut handles = Vec::new();
    for i in 0..permits + 1 {
        let pipeline = Arc::clone(&pipeline);
        let request = SigningRequest::new(
            SourceLocator::Path(input.clone()),
            "CASEGATE",
            &format!("{}", i),
        );
        handles.push(tokio::spawn(
            async move { pipeline.process(request).await },
        ));
    }

    let mut peak = 0usize;
    while handles.iter().any(|h| !h.is_finished()) {
        peak = peak.max(pipeline.in_flight());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.status, RequestStatus::Completed);
    }

    assert!(peak <= permits, "observed {} in flight", peak);
    assert_eq!(pipeline.in_flight(), 0);
}
