//! Compiling and building through a [`Provisioner`] with the scripted compiler.

use std::{
    collections::HashSet,
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use pipeline_provision::{
    backend::{GraphicsBackend, HeadlessBackend, ObjectKind},
    builder::{BuildError, InterfaceMismatch},
    config::ProvisionConfig,
    descriptor::{
        ColorTargetState, FixedFunctionState, PipelineRecipe, TextureFormat, VertexBufferLayout,
        VertexFormat,
    },
    provisioner::{ProvisionError, Provisioner},
    slang_module_cache::{
        diagnostic::Severity,
        options::{CompileOptions, ShaderStage},
    },
};
use pipeline_provision_test_utils::{FaultyBackend, ScriptedCompiler, ShaderTree};

const VERTEX: &str = "\
// @in 0 position float3
// @out 0 color float4
[shader(\"vertex\")]
float4 main(float3 position) { return float4(position, 1.0); }
";

const FRAGMENT: &str = "\
#include \"common/lighting.slang\"
// @in 0 color float4
[shader(\"fragment\")]
float4 main(float4 color) { return shade(color); }
";

const LIGHTING: &str = "\
// @binding 0 0 lights uniform
float4 shade(float4 color) { return color; }
";

fn state() -> FixedFunctionState {
    FixedFunctionState::default()
        .vertex_buffer(VertexBufferLayout::new(12).attribute(0, VertexFormat::Float32x3, 0))
        .color_target(ColorTargetState::new(TextureFormat::Rgba8Unorm))
}

fn tree() -> anyhow::Result<ShaderTree> {
    let tree = ShaderTree::new()?;
    tree.write("triangle.vert.slang", VERTEX)?;
    tree.write("triangle.frag.slang", FRAGMENT)?;
    tree.write("common/lighting.slang", LIGHTING)?;
    Ok(tree)
}

fn provisioner(compiler: &Arc<ScriptedCompiler>, backend: Arc<dyn GraphicsBackend>) -> Provisioner {
    let config = ProvisionConfig::default().worker_threads(Some(2));
    Provisioner::new(config, compiler.clone(), backend).unwrap()
}

fn recipe(tree: &ShaderTree, provisioner: &Provisioner) -> PipelineRecipe {
    PipelineRecipe::new("triangle", state())
        .shader(provisioner.shader_key(tree.path("triangle.vert.slang"), ShaderStage::Vertex))
        .shader(provisioner.shader_key(tree.path("triangle.frag.slang"), ShaderStage::Fragment))
}

#[test_log::test]
fn distinct_requests_never_share_a_fingerprint() -> anyhow::Result<()> {
    let tree = tree()?;
    tree.write("twin.vert.slang", VERTEX)?;
    let provisioner = provisioner(
        &Arc::new(ScriptedCompiler::new()),
        Arc::new(HeadlessBackend::new()),
    );
    let vertex = tree.path("triangle.vert.slang");

    let keys = [
        provisioner.shader_key(&vertex, ShaderStage::Vertex),
        provisioner.shader_key(&vertex, ShaderStage::Fragment),
        provisioner.shader_key(tree.path("twin.vert.slang"), ShaderStage::Vertex),
        provisioner.shader_key(tree.path("triangle.frag.slang"), ShaderStage::Fragment),
        pipeline_provision::descriptor::ShaderKey::new(
            &vertex,
            CompileOptions::new(ShaderStage::Vertex).define("SKINNED", "1"),
        ),
        pipeline_provision::descriptor::ShaderKey::new(
            &vertex,
            CompileOptions::new(ShaderStage::Vertex).profile("spirv_1_5"),
        ),
    ];
    let fingerprints: HashSet<_> = keys
        .iter()
        .map(|key| provisioner.prepare_shader(key))
        .collect::<Result<_, _>>()?;
    assert_eq!(fingerprints.len(), keys.len());

    let again = provisioner.prepare_shader(&keys[0])?;
    assert!(fingerprints.contains(&again));
    Ok(())
}

#[test_log::test]
fn concurrent_requests_compile_exactly_once() -> anyhow::Result<()> {
    let tree = tree()?;
    let compiler = Arc::new(ScriptedCompiler::new().delay(Duration::from_millis(50)));
    let provisioner = provisioner(&compiler, Arc::new(HeadlessBackend::new()));
    let key = provisioner.shader_key(tree.path("triangle.frag.slang"), ShaderStage::Fragment);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let provisioner = provisioner.clone();
            let barrier = barrier.clone();
            let key = key.clone();
            thread::spawn(move || {
                barrier.wait();
                provisioner.compile(&key).unwrap()
            })
        })
        .collect();
    let modules: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(compiler.calls(), 1);
    assert!(modules.iter().all(|module| Arc::ptr_eq(module, &modules[0])));
    assert_eq!(provisioner.stats().modules.compilations, 1);
    assert_eq!(provisioner.stats().modules.hits, 7);
    Ok(())
}

#[test_log::test]
fn recompiling_gives_a_bit_identical_module() -> anyhow::Result<()> {
    let tree = tree()?;
    let compiler = Arc::new(ScriptedCompiler::new());
    let provisioner = provisioner(&compiler, Arc::new(HeadlessBackend::new()));
    let key = provisioner.shader_key(tree.path("triangle.frag.slang"), ShaderStage::Fragment);

    let first = provisioner.compile(&key)?;
    assert!(provisioner.modules().invalidate(first.fingerprint()));
    let second = provisioner.compile(&key)?;

    assert_eq!(compiler.calls(), 2);
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(first.payload(), second.payload());
    assert_eq!(second.entry_point().bindings.len(), 1);
    Ok(())
}

#[test_log::test]
fn compile_error_in_include_points_at_the_included_file() -> anyhow::Result<()> {
    let tree = tree()?;
    let broken = tree.write(
        "common/lighting.slang",
        "float4 shade(float4 color) {\n    return color\n    // @error expected ';'\n}\n",
    )?;
    let compiler = Arc::new(ScriptedCompiler::new());
    let provisioner = provisioner(&compiler, Arc::new(HeadlessBackend::new()));
    let key = provisioner.shader_key(tree.path("triangle.frag.slang"), ShaderStage::Fragment);

    let error = provisioner.compile(&key).unwrap_err();
    let ProvisionError::Compile { source, .. } = &error else {
        panic!("expected a compile error, got {error}");
    };
    let diagnostics = source.diagnostics().unwrap();
    let diagnostic = diagnostics.errors().next().unwrap();
    assert_eq!(diagnostic.severity, Severity::Error);
    assert_eq!(diagnostic.message, "expected ';'");
    let location = diagnostic.location.as_ref().unwrap();
    assert_eq!(location.file, broken);
    assert_eq!(location.line, 3);
    assert_eq!(location.column, 5);

    // failures are remembered until the source changes
    assert!(provisioner.compile(&key).is_err());
    assert_eq!(compiler.calls(), 1);
    Ok(())
}

#[test_log::test]
fn warnings_are_kept_with_the_module() -> anyhow::Result<()> {
    let tree = tree()?;
    tree.write(
        "noisy.frag.slang",
        "// @in 0 color float4\n// @warn implicit truncation\nfloat4 main() {}\n",
    )?;
    let provisioner = provisioner(
        &Arc::new(ScriptedCompiler::new()),
        Arc::new(HeadlessBackend::new()),
    );

    let module = provisioner.compile(
        &provisioner.shader_key(tree.path("noisy.frag.slang"), ShaderStage::Fragment),
    )?;
    assert_eq!(module.warnings().len(), 1);
    assert_eq!(module.warnings()[0].location.as_ref().map(|location| location.line), Some(2));

    let strict = pipeline_provision::descriptor::ShaderKey::new(
        tree.path("noisy.frag.slang"),
        CompileOptions::new(ShaderStage::Fragment).warnings_as_errors(true),
    );
    assert!(matches!(
        provisioner.compile(&strict),
        Err(ProvisionError::Compile { .. })
    ));
    Ok(())
}

#[test_log::test]
fn vec3_output_into_vec4_input_fails_without_gpu_calls() -> anyhow::Result<()> {
    let tree = tree()?;
    tree.write("triangle.vert.slang", &VERTEX.replace("color float4", "color float3"))?;
    let backend = Arc::new(HeadlessBackend::new());
    let provisioner = provisioner(&Arc::new(ScriptedCompiler::new()), backend.clone());

    let error = provisioner.build_recipe(&recipe(&tree, &provisioner)).unwrap_err();
    let ProvisionError::Build { source, label } = &error else {
        panic!("expected a build error, got {error}");
    };
    assert_eq!(label, "triangle");
    assert!(matches!(
        **source,
        BuildError::InterfaceMismatch(InterfaceMismatch::VaryingType { location: 0, .. })
    ));
    assert_eq!(backend.pipelines_created(), 0);
    assert_eq!(backend.live_total(), 0);
    assert!(provisioner.pipelines().is_empty());
    Ok(())
}

#[test_log::test]
fn missing_vertex_attribute_fails_without_gpu_calls() -> anyhow::Result<()> {
    let tree = tree()?;
    let backend = Arc::new(HeadlessBackend::new());
    let provisioner = provisioner(&Arc::new(ScriptedCompiler::new()), backend.clone());
    let mut recipe = recipe(&tree, &provisioner);
    recipe.state.vertex_buffers.clear();

    let error = provisioner.build_recipe(&recipe).unwrap_err();
    assert!(matches!(
        &error,
        ProvisionError::Build { source, .. } if matches!(
            **source,
            BuildError::InterfaceMismatch(InterfaceMismatch::MissingVertexAttribute { .. })
        )
    ));
    assert_eq!(backend.live_total(), 0);
    Ok(())
}

#[test_log::test]
fn failed_gpu_allocation_leaks_nothing() -> anyhow::Result<()> {
    let tree = tree()?;
    let backend = Arc::new(FaultyBackend::new());
    let provisioner = provisioner(&Arc::new(ScriptedCompiler::new()), backend.clone());
    let recipe = recipe(&tree, &provisioner);

    for nth in 1..=3 {
        backend.fail_nth(nth);
        let error = provisioner.build_recipe(&recipe).unwrap_err();
        assert!(
            matches!(
                &error,
                ProvisionError::Build { source, .. } if matches!(**source, BuildError::Gpu(_))
            ),
            "allocation {nth}: {error}"
        );
        assert_eq!(backend.headless().live_total(), 0, "allocation {nth}");
    }
    assert!(provisioner.pipelines().is_empty());

    // build failures are not remembered
    let pipeline = provisioner.build_recipe(&recipe)?;
    assert!(backend.headless().is_live(pipeline.handle()));
    assert_eq!(backend.headless().live(ObjectKind::Pipeline), 1);
    assert_eq!(backend.headless().live(ObjectKind::ShaderModule), 0);
    assert_eq!(provisioner.stats().pipelines.failures, 3);
    Ok(())
}

#[test_log::test]
fn equal_descriptors_share_one_pipeline() -> anyhow::Result<()> {
    let tree = tree()?;
    let backend = Arc::new(HeadlessBackend::new());
    let provisioner = provisioner(&Arc::new(ScriptedCompiler::new()), backend.clone());
    let recipe = recipe(&tree, &provisioner);

    let first = provisioner.build_recipe(&recipe)?;
    let mut relabelled = recipe.clone();
    relabelled.label = "triangle again".to_owned();
    let second = provisioner.build_recipe(&relabelled)?;
    assert!(Arc::ptr_eq(&first, &second));

    let descriptor = provisioner.describe(&recipe)?;
    assert_eq!(descriptor.fingerprint(), first.fingerprint());
    assert!(Arc::ptr_eq(&provisioner.get_or_build(&descriptor).unwrap(), &first));
    assert_eq!(backend.pipelines_created(), 1);
    Ok(())
}

#[test_log::test]
fn background_tasks_can_be_awaited() -> anyhow::Result<()> {
    let tree = tree()?;
    let compiler = Arc::new(ScriptedCompiler::new());
    let provisioner = provisioner(&compiler, Arc::new(HeadlessBackend::new()));
    let key = provisioner.shader_key(tree.path("triangle.vert.slang"), ShaderStage::Vertex);

    let module = provisioner.compile_async(key).wait()??;
    let pipeline = provisioner
        .build_recipe_async(recipe(&tree, &provisioner))
        .wait()??;
    assert!(Arc::ptr_eq(&pipeline.modules()[0], &module));
    assert_eq!(compiler.calls(), 2);

    provisioner.shutdown();
    assert!(provisioner.pipelines().is_empty());
    assert_eq!(provisioner.stats().outstanding_tasks, 0);
    Ok(())
}

#[test_log::test]
fn missing_include_is_a_source_error() -> anyhow::Result<()> {
    let tree = tree()?;
    tree.remove("common/lighting.slang")?;
    let compiler = Arc::new(ScriptedCompiler::new());
    let provisioner = provisioner(&compiler, Arc::new(HeadlessBackend::new()));

    let error = provisioner
        .compile(&provisioner.shader_key(tree.path("triangle.frag.slang"), ShaderStage::Fragment))
        .unwrap_err();
    assert!(matches!(error, ProvisionError::Source { .. }));
    assert_eq!(compiler.calls(), 0);
    Ok(())
}
