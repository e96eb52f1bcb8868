use std::io::Read;

use oci_pull::{
    ErrorKind, FsStore, LayerDescriptor, MediaType, NoEventHandler, Platforms, Puller, Reference,
    RegistryClient, RootFsType, SharedBase,
};

mod common;

use common::{
    blobs::{image_manifest, Blob},
    registry::{start_mirror, TestRegistry},
};

fn foreign_layer() -> Blob {
    Blob::archive(MediaType::DockerForeignFsTarGzip)
        .regular("base", "foreign content")
        .build()
}

#[test]
fn open_first_available_url() {
    let layer = foreign_layer();

    let (port, log) = start_mirror(vec![
        ("/u1", None),
        ("/u2", Some(layer.data.clone())),
        ("/u3", Some(layer.data.clone())),
    ]);

    let mut descriptor = LayerDescriptor::new(layer.digest(), layer.media_type);
    descriptor.urls = ["u1", "u2", "u3"]
        .iter()
        .map(|u| format!("http://127.0.0.1:{port}/{u}"))
        .collect();

    assert!(descriptor.is_foreign());

    // The registry is never used for layers with URLs.
    let reference = Reference::try_from("127.0.0.1:1/unused/repo").unwrap();
    let registry = RegistryClient::new(&reference, &NoEventHandler);

    let mut content = Vec::new();
    descriptor
        .open(&registry, &NoEventHandler)
        .unwrap()
        .read_to_end(&mut content)
        .unwrap();

    assert_eq!(&content[..], &layer.data[..]);
    assert_eq!(*log.lock().unwrap(), ["/u1", "/u2"]);
}

#[test]
fn pull_foreign_layers() {
    let store_dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(store_dir.path()).unwrap();

    let foreign = foreign_layer();
    let (port, mirror_log) = start_mirror(vec![
        ("/u1", None),
        ("/u2", Some(foreign.data.clone())),
        ("/u3", Some(foreign.data.clone())),
    ]);

    let foreign = foreign.with_urls(
        ["u1", "u2", "u3"]
            .iter()
            .map(|u| format!("http://127.0.0.1:{port}/{u}")),
    );

    let top = Blob::archive(MediaType::DockerFsTarGzip)
        .regular("app", "top layer")
        .build();

    let config = Blob::new(MediaType::DockerImageV1, &b"{}"[..]);

    let mut registry = TestRegistry::new("windows/app");
    registry.manifest(
        "latest",
        MediaType::DockerManifestV2,
        image_manifest(MediaType::DockerManifestV2, &config, &[foreign.clone(), top.clone()]),
    );

    // Only the top layer is in the registry.
    registry.blobs([top.clone()]);
    let registry = registry.start();

    let reference = registry.reference("latest");
    let reference = Reference::try_from(reference.as_str()).unwrap();
    let client = RegistryClient::new(&reference, &NoEventHandler);

    let platforms = Platforms::new().register(SharedBase);

    let pulled = Puller::new(&client, &store, &platforms)
        .unwrap()
        .pull(&reference)
        .unwrap();

    assert_eq!(pulled.rootfs.layers, [foreign.digest(), top.digest()]);

    // Schema 2 manifests don't declare a base layer.
    assert_eq!(pulled.rootfs.kind, RootFsType::Layers);

    assert_eq!(*mirror_log.lock().unwrap(), ["/u1", "/u2"]);
    assert_eq!(registry.blob_requests(&foreign.digest), 0);
    assert_eq!(registry.blob_requests(&top.digest), 1);
}

#[test]
fn all_urls_fail() {
    let store_dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(store_dir.path()).unwrap();

    let (port, mirror_log) = start_mirror(vec![("/u1", None), ("/u2", None)]);

    let foreign = foreign_layer().with_urls(
        ["u1", "u2"]
            .iter()
            .map(|u| format!("http://127.0.0.1:{port}/{u}")),
    );

    let config = Blob::new(MediaType::DockerImageV1, &b"{}"[..]);

    let mut registry = TestRegistry::new("windows/broken");
    registry.manifest(
        "latest",
        MediaType::DockerManifestV2,
        image_manifest(MediaType::DockerManifestV2, &config, &[foreign]),
    );

    let registry = registry.start();

    let reference = registry.reference("latest");
    let reference = Reference::try_from(reference.as_str()).unwrap();
    let client = RegistryClient::new(&reference, &NoEventHandler);

    let error = Puller::new(&client, &store, &Platforms::new().register(SharedBase))
        .unwrap()
        .pull(&reference)
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Transfer);
    assert!(error.to_string().contains("/u2"));

    assert_eq!(*mirror_log.lock().unwrap(), ["/u1", "/u2"]);
    assert!(store.images().unwrap().is_empty());
}
