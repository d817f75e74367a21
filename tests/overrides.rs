//! Redirection, kind overrides, and the nested-acquire kind graph.

mod common;

use std::sync::Arc;

use common::{setup, Blob};
use loadstone::KindDescriptor;

#[test]
fn test_redirection_resolves_before_lookup() {
    let env = setup(0);
    env.loader.insert("textures/menu_bg.dds", b"bg".to_vec());
    env.cache.register_redirect("MenuBackground", "textures/menu_bg.dds");

    let alias = env.cache.load::<Blob>(env.kind, "MenuBackground");
    let direct = env.cache.load::<Blob>(env.kind, "textures/menu_bg.dds");

    assert_eq!(alias, direct);
    assert_eq!(alias.id(), "textures/menu_bg.dds");
    assert_eq!(env.cache.metrics().entities_created(), 1);
}

#[test]
fn test_unregistered_redirect_is_literal() {
    let env = setup(0);
    env.cache.register_redirect("alias", "real");
    env.cache.unregister_redirect("alias");

    let handle = env.cache.load::<Blob>(env.kind, "alias");
    assert_eq!(handle.id(), "alias");
}

#[test]
fn test_override_specializes_requested_kind() {
    let env = setup(0);
    let cubemap = env.cache.register_kind(
        KindDescriptor::new("cubemap", env.builder.clone()).parent(env.kind),
    );
    env.cache
        .register_override(cubemap, Arc::new(|id: &str| id.ends_with(".cube")));

    let specialized = env.cache.load::<Blob>(env.kind, "sky.cube");
    assert_eq!(specialized.kind(), cubemap);

    let plain = env.cache.load::<Blob>(env.kind, "wall.dds");
    assert_eq!(plain.kind(), env.kind);
}

#[test]
fn test_override_chains_to_fixed_point() {
    let env = setup(0);
    let cubemap = env.cache.register_kind(
        KindDescriptor::new("cubemap", env.builder.clone()).parent(env.kind),
    );
    let hdr_cubemap = env.cache.register_kind(
        KindDescriptor::new("hdr_cubemap", env.builder.clone()).parent(cubemap),
    );
    env.cache
        .register_override(cubemap, Arc::new(|id: &str| id.ends_with(".cube")));
    env.cache
        .register_override(hdr_cubemap, Arc::new(|id: &str| id.contains(".hdr")));

    let handle = env.cache.load::<Blob>(env.kind, "sky.hdr.cube");
    assert_eq!(handle.kind(), hdr_cubemap);
}

#[test]
fn test_double_registration_unregisters_cleanly() {
    let env = setup(0);
    let cubemap = env.cache.register_kind(
        KindDescriptor::new("cubemap", env.builder.clone()).parent(env.kind),
    );

    // registering twice must behave exactly like registering once
    env.cache
        .register_override(cubemap, Arc::new(|id: &str| id.ends_with(".cube")));
    env.cache
        .register_override(cubemap, Arc::new(|id: &str| id.ends_with(".cube")));
    env.cache.unregister_override(cubemap);

    let handle = env.cache.load::<Blob>(env.kind, "sky.cube");
    assert_eq!(handle.kind(), env.kind);
}

#[test]
fn test_override_round_trip_restores_resolution() {
    let env = setup(0);
    let cubemap = env.cache.register_kind(
        KindDescriptor::new("cubemap", env.builder.clone()).parent(env.kind),
    );

    let before = env.cache.load::<Blob>(env.kind, "a.cube");
    assert_eq!(before.kind(), env.kind);

    env.cache
        .register_override(cubemap, Arc::new(|id: &str| id.ends_with(".cube")));
    let during = env.cache.load::<Blob>(env.kind, "b.cube");
    assert_eq!(during.kind(), cubemap);

    env.cache.unregister_override(cubemap);
    let after = env.cache.load::<Blob>(env.kind, "c.cube");
    assert_eq!(after.kind(), env.kind);

    // and the pre-registration entity is still resolvable as before
    let again = env.cache.load::<Blob>(env.kind, "a.cube");
    assert_eq!(again, before);
}

#[test]
fn test_override_installs_on_all_ancestors() {
    let env = setup(0);
    let image = env.cache.register_kind(
        KindDescriptor::new("image", env.builder.clone()).parent(env.kind),
    );
    let compressed = env.cache.register_kind(
        KindDescriptor::new("compressed_image", env.builder.clone()).parent(image),
    );
    env.cache
        .register_override(compressed, Arc::new(|id: &str| id.ends_with(".ktx")));

    // a request against the grandparent resolves too
    let handle = env.cache.load::<Blob>(env.kind, "cliff.ktx");
    assert_eq!(handle.kind(), compressed);
}

#[test]
fn test_nested_acquire_closure_covers_diamonds() {
    let env = setup(0);
    let base = env
        .cache
        .register_kind(KindDescriptor::new("buffer", env.builder.clone()));
    let vertex = env.cache.register_kind(
        KindDescriptor::new("vertex_buffer", env.builder.clone()).parent(base),
    );
    let index = env.cache.register_kind(
        KindDescriptor::new("index_buffer", env.builder.clone()).parent(base),
    );
    let unified = env.cache.register_kind(
        KindDescriptor::new("unified_buffer", env.builder.clone())
            .parent(vertex)
            .parent(index),
    );
    let mesh = env
        .cache
        .register_kind(KindDescriptor::new("mesh", env.builder.clone()));

    env.cache.allow_nested_acquire(mesh, base);

    assert!(env.cache.is_nested_acquire_allowed(mesh, base));
    assert!(env.cache.is_nested_acquire_allowed(mesh, vertex));
    assert!(env.cache.is_nested_acquire_allowed(mesh, index));
    assert!(env.cache.is_nested_acquire_allowed(mesh, unified));
    assert!(!env.cache.is_nested_acquire_allowed(mesh, env.kind));
    assert!(!env.cache.is_nested_acquire_allowed(base, mesh));
}

#[test]
fn test_asset_type_registration() {
    let env = setup(0);
    env.cache.register_asset_type("Texture 2D", env.kind);

    assert_eq!(env.cache.find_kind_for_asset_type("texture 2d"), Some(env.kind));
    assert_eq!(env.cache.find_kind_for_asset_type("TEXTURE 2D"), Some(env.kind));
    assert_eq!(env.cache.find_kind_for_asset_type("mesh"), None);
}

#[test]
fn test_kind_lookup_by_name() {
    let env = setup(0);
    assert_eq!(env.cache.kind_by_name("BLOB"), Some(env.kind));
    assert_eq!(env.cache.kind_by_name("nope"), None);
    assert_eq!(env.cache.kind_name(env.kind).as_ref(), "blob");
}
