use crate::{
    error::try_store,
    manifest::Manifest,
    store::{LayerStore, RootFs, RootFsType},
    PullError,
};

/// Attach `rootfs` to the base layer declared by the oldest entry of
/// `manifest`.
///
/// The base layer must be in an image already in `store`. Any image
/// with the same base layer can be used, since base layer IDs are
/// unique.
///
/// Manifests without embedded metadata (like schema 2 or OCI) don't
/// declare a base layer, so `rootfs` is not modified.
pub fn detect_base_layer(
    store: &dyn LayerStore,
    manifest: &Manifest,
    rootfs: &mut RootFs,
) -> Result<(), PullError> {
    let oldest = manifest
        .history
        .first()
        .ok_or_else(|| PullError::MalformedManifest("no layers".into()))?;

    let Some(v1_image) = oldest.v1_image()? else {
        tracing::debug!(digest = %oldest.layer.digest, "No metadata to find a base layer");
        return Ok(());
    };

    if v1_image.parent.is_empty() {
        return Err(PullError::MalformedManifest(format!(
            "last layer {:?} does not have a base layer reference",
            v1_image.id
        )));
    }

    let parent = v1_image.parent;

    let images = try_store!(
        format!("base layer {parent}"),
        store.find_images_by_base_layer(&parent)
    );

    let Some(image) = images.into_iter().next() else {
        return Err(PullError::UnresolvedBaseLayer { parent });
    };

    tracing::debug!(%parent, image = %image.id, "Base layer found");

    rootfs.kind = RootFsType::LayersWithBase;
    rootfs.base_layer = image.rootfs.base_layer;

    Ok(())
}
