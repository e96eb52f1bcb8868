use std::{io::Read, sync::Arc};

use oci_pull::{
    FsSignatureStore, FsStore, MediaType, Platforms, PolicyContext, PullError, Puller, Reference,
    RegistryClient, RootFsType, SelfContained,
};

mod common;

use common::{
    blobs::{image_manifest, Blob},
    registry::{self, image_index, TestRegistry},
};

fn layers() -> Vec<Blob> {
    vec![
        Blob::archive(MediaType::OciFsTarGzip)
            .directory("etc")
            .regular("etc/hostname", "test")
            .build(),
        Blob::archive(MediaType::OciFsTar)
            .regular("a", "0123456789")
            .build(),
        #[cfg(feature = "zstd")]
        Blob::archive(MediaType::OciFsTarZstd)
            .regular("from.zstd", "01234")
            .build(),
    ]
}

fn config() -> Blob {
    Blob::new(MediaType::OciConfig, &br#"{"test": true}"#[..])
}

#[test]
fn pull_image_into_store() {
    let store_dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(store_dir.path()).unwrap();

    let layers = layers();
    let mut registry = TestRegistry::new("foo/bar");
    let manifest_digest = registry.manifest(
        "0.1",
        MediaType::OciManifestV1,
        image_manifest(MediaType::OciManifestV1, &config(), &layers),
    );

    registry.blobs(layers.iter().cloned());
    let registry = registry.start();

    let reference = registry.reference("0.1");
    let reference = Reference::try_from(reference.as_str()).unwrap();

    let client = RegistryClient::new(&reference, &oci_pull::NoEventHandler);
    let signatures = Arc::new(FsSignatureStore::new(store_dir.path().join("signatures")));
    let platforms = Platforms::new().register(SelfContained::new(None, signatures));

    let pulled = Puller::new(&client, &store, &platforms)
        .unwrap()
        .pull(&reference)
        .unwrap();

    assert_eq!(pulled.reference, reference);
    assert_eq!(pulled.image_id.to_string(), manifest_digest);
    assert_eq!(pulled.rootfs.kind, RootFsType::Layers);
    assert_eq!(
        pulled.rootfs.layers,
        layers.iter().map(Blob::digest).collect::<Vec<_>>()
    );

    // Layers are stored with their metadata.
    for layer in &layers {
        let info = store.layer(&layer.digest()).unwrap().unwrap();
        assert_eq!(info.media_type, layer.media_type);

        let mut stored = Vec::new();
        store
            .open_layer(&layer.digest())
            .unwrap()
            .read_to_end(&mut stored)
            .unwrap();

        assert_eq!(&stored[..], &layer.data[..]);
    }

    // OciFsTar is not compressed, so its DiffID is the digest of the blob.
    let info = store.layer(&layers[1].digest()).unwrap().unwrap();
    assert_eq!(info.diff_id, layers[1].digest());
    assert_eq!(info.size, 10);

    let images = store.images().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].reference, reference.to_string());

    // Pull again. Blobs are not downloaded.
    let requests = registry.requests().len();

    Puller::new(&client, &store, &platforms)
        .unwrap()
        .pull(&reference)
        .unwrap();

    assert_eq!(registry.requests().len(), requests + 2);
    for layer in &layers {
        assert_eq!(registry.blob_requests(&layer.digest), 1);
    }
}

#[test]
fn follow_image_index() {
    let store_dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(store_dir.path()).unwrap();

    let layers = layers();
    let manifest = image_manifest(MediaType::OciManifestV1, &config(), &layers);
    let manifest_len = manifest.len();

    let mut registry = TestRegistry::new("multi/arch");
    let manifest_digest = registry.manifest("pinned", MediaType::OciManifestV1, manifest);
    registry.manifest(
        "latest",
        MediaType::OciImageIndex,
        image_index(&manifest_digest, manifest_len),
    );

    registry.blobs(layers);
    let registry = registry.start();

    let reference = registry.reference("latest");
    let reference = Reference::try_from(reference.as_str()).unwrap();

    let client = RegistryClient::new(&reference, &oci_pull::NoEventHandler)
        .architecture(registry::ARCH)
        .os(registry::OS);

    let signatures = Arc::new(FsSignatureStore::new(store_dir.path().join("signatures")));
    let platforms = Platforms::new().register(SelfContained::new(None, signatures));

    let pulled = Puller::new(&client, &store, &platforms)
        .unwrap()
        .pull(&reference)
        .unwrap();

    assert_eq!(pulled.image_id.to_string(), manifest_digest);

    // No entry for the platform.
    let client = RegistryClient::new(&reference, &oci_pull::NoEventHandler)
        .architecture("missing")
        .os(registry::OS);

    let error = Puller::new(&client, &store, &platforms)
        .unwrap()
        .pull(&reference)
        .unwrap_err();

    assert!(matches!(error, PullError::NotFound(_)));
}

#[test]
fn policy_and_signatures() {
    let store_dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(store_dir.path().join("store")).unwrap();

    let layers = layers();
    let mut registry = TestRegistry::new("signed/app");
    let manifest = image_manifest(MediaType::OciManifestV1, &config(), &layers);
    let manifest_digest = registry.manifest("1.0", MediaType::OciManifestV1, manifest.clone());
    registry.manifest("2.0", MediaType::OciManifestV1, manifest);

    registry.signature(&manifest_digest, b"first signature");
    registry.blobs(layers);
    let registry = registry.start();

    let policy_path = store_dir.path().join("policy.json");
    std::fs::write(
        &policy_path,
        format!(
            r#"{{
                "default": [{{"type": "reject"}}],
                "transports": {{
                    "docker": {{
                        "127.0.0.1:{port}/signed": [{{"type": "insecureAcceptAnything"}}],
                        "127.0.0.1:{port}/signed/app:2.0": [{{"type": "reject"}}]
                    }}
                }}
            }}"#,
            port = registry.port
        ),
    )
    .unwrap();

    let policy = PolicyContext::from_file(&policy_path).unwrap();

    let signatures_dir = store_dir.path().join("signatures");
    let signatures = Arc::new(FsSignatureStore::new(&signatures_dir));
    let platforms = Platforms::new().register(SelfContained::new(Some(policy), signatures.clone()));

    let reference = registry.reference("1.0");
    let reference = Reference::try_from(reference.as_str()).unwrap();
    let client = RegistryClient::new(&reference, &oci_pull::NoEventHandler);

    for _ in 0..2 {
        let pulled = Puller::new(&client, &store, &platforms)
            .unwrap()
            .pull(&reference)
            .unwrap();

        assert_eq!(pulled.reference.tag, None);
        assert_eq!(
            pulled.reference.digest.as_ref().map(|d| d.to_string()),
            Some(manifest_digest.clone())
        );

        assert!(pulled.signature_error.is_none());
    }

    let identity = oci_pull::Digest::try_from(manifest_digest.as_str()).unwrap();
    assert_eq!(
        signatures.signatures(&identity).unwrap(),
        [b"first signature".to_vec()]
    );

    // Tag rejected by a more specific scope.
    let other = registry.reference("2.0");
    let other = Reference::try_from(other.as_str()).unwrap();
    let client = RegistryClient::new(&other, &oci_pull::NoEventHandler);

    let images = store.images().unwrap().len();
    let error = Puller::new(&client, &store, &platforms)
        .unwrap()
        .pull(&other)
        .unwrap_err();

    assert!(matches!(error, PullError::PolicyDenied { .. }));
    assert!(error.to_string().contains("isn't allowed: Running image"));
    assert_eq!(store.images().unwrap().len(), images);
}
