//! End-to-end patch and verify runs over fixture assemblies.

mod common;

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use common::{
    assemblyref_scope, call_body, ret_body, sig_void, sig_void_int, typeref_coded, AssemblyFixture,
};
use netbehave::{
    image::AssemblyImage,
    metadata::{
        il::MethodBody,
        signatures::{MethodSig, TypeSig},
        tables::TableId,
    },
    patch_assembly, verify_assembly, verify_patch, Error, PatchOptions,
};

/// Public, hide-by-sig, virtual, new-slot.
const BASE_EVENT_FLAGS: u32 = 0x01C6;
/// Public, hide-by-sig, virtual (reuse slot).
const OVERRIDE_FLAGS: u32 = 0x00C6;
/// Public, hide-by-sig, non-virtual.
const PLAIN_FLAGS: u32 = 0x0086;

fn write_base_lib(dir: &Path) -> PathBuf {
    let mut base = AssemblyFixture::new("BaseLib");
    base.add_typedef("Game", "Base", 0);
    base.add_method("OnX", &sig_void(), BASE_EVENT_FLAGS, ret_body());
    base.add_method("OnY", &sig_void_int(), BASE_EVENT_FLAGS, ret_body());
    base.add_param(1, "value");

    let path = dir.join("BaseLib.dll");
    std::fs::write(&path, base.build()).unwrap();
    path
}

/// Game.dll with one subclass of Game.Base that only overrides OnX.
fn write_game(dir: &Path) -> PathBuf {
    let mut game = AssemblyFixture::new("Game");
    let baselib = game.add_assemblyref("BaseLib");
    let base_typeref = game.add_typeref(assemblyref_scope(baselib), "Game", "Base");
    game.add_typedef("Game", "Derived", typeref_coded(base_typeref));
    game.add_method("OnX", &sig_void(), OVERRIDE_FLAGS, ret_body());

    let path = dir.join("Game.dll");
    std::fs::write(&path, game.build()).unwrap();
    path
}

fn options_for(dir: &Path) -> PatchOptions {
    PatchOptions {
        base_type: "Game.Base".to_string(),
        prefix: "On".to_string(),
        cache_dir: dir.join("cache"),
        search_dirs: vec![dir.to_path_buf()],
    }
}

#[test]
fn patch_adds_missing_event_method() {
    let dir = TempDir::new().unwrap();
    write_base_lib(dir.path());
    let game = write_game(dir.path());
    let options = options_for(dir.path());

    let summary = patch_assembly(&game, &options).unwrap();

    assert_eq!(summary.event_names, vec!["OnX", "OnY"]);
    assert_eq!(summary.candidate_types, vec!["Game.Derived"]);
    assert_eq!(summary.methods_added, 1);
    assert_eq!(summary.output_path, dir.path().join("cache/Game.dll"));

    let patched = AssemblyImage::open(&summary.output_path).unwrap();
    let derived = patched.find_typedef("Game", "Derived").unwrap().unwrap();
    let (start, end) = patched.method_range(derived).unwrap();
    let names: Vec<String> = (start..end)
        .map(|rid| patched.method_name(rid).unwrap())
        .collect();
    assert_eq!(names, vec!["OnX", "OnY"]);

    let on_y = end - 1;
    assert_eq!(u32::from(patched.method_flags(on_y).unwrap()), OVERRIDE_FLAGS);

    let signature = MethodSig::parse(patched.method_signature(on_y).unwrap()).unwrap();
    assert!(signature.has_this);
    assert_eq!(signature.return_type, TypeSig::Void);
    assert_eq!(signature.params, vec![TypeSig::I4]);

    let (param_start, param_end) = patched.param_range(on_y).unwrap();
    assert_eq!(param_end - param_start, 1);
    let param = patched.tables.row(TableId::Param, param_start).unwrap().clone();
    assert_eq!(param[1], 1);
    assert_eq!(patched.strings().unwrap().get(param[2]).unwrap(), "value");

    // The new body forwards both arguments into a call and returns.
    let rva = patched.tables.row(TableId::MethodDef, on_y).unwrap()[0];
    assert_ne!(rva, 0);
    let offset = patched.file().rva_to_offset(rva).unwrap();
    let body = MethodBody::parse(patched.file().data(), offset).unwrap();
    let code = patched
        .file()
        .data_slice(offset + body.header_size as usize, body.code_size as usize)
        .unwrap();
    assert_eq!(code[0], 0x02); // ldarg.0
    assert_eq!(code[1], 0x03); // ldarg.1
    assert_eq!(code[2], 0x28); // call
    assert_eq!(code[6], 0x0A); // MemberRef token
    assert_eq!(*code.last().unwrap(), 0x2A); // ret

    let report = verify_assembly(&summary.output_path, &options).unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.compliant, 1);
    assert!(report.is_fully_compliant());
}

#[test]
fn patching_a_patched_assembly_adds_nothing() {
    let dir = TempDir::new().unwrap();
    write_base_lib(dir.path());
    let game = write_game(dir.path());
    let options = options_for(dir.path());

    let first = patch_assembly(&game, &options).unwrap();
    assert_eq!(first.methods_added, 1);

    let mut second_options = options_for(dir.path());
    second_options.cache_dir = dir.path().join("cache2");

    let second = patch_assembly(&first.output_path, &second_options).unwrap();
    assert_eq!(second.methods_added, 0);
    assert!(second.output_path.is_file());
}

#[test]
fn missing_base_reference_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut solo = AssemblyFixture::new("Solo");
    solo.add_typedef("Solo", "Standalone", 0);
    solo.add_method("Run", &sig_void(), PLAIN_FLAGS, ret_body());
    let path = dir.path().join("Solo.dll");
    std::fs::write(&path, solo.build()).unwrap();

    let options = options_for(dir.path());
    let result = patch_assembly(&path, &options);

    assert!(matches!(result, Err(Error::MissingBaseType(_))));
    assert!(!options.cache_dir.join("Solo.dll").exists());
}

#[test]
fn methoddef_call_tokens_follow_moved_rows() {
    let dir = TempDir::new().unwrap();
    write_base_lib(dir.path());

    // Derived.Caller invokes Other.Tail by rid; inserting OnY into Derived's
    // method run shifts Tail from rid 3 to rid 4.
    let mut game = AssemblyFixture::new("Game");
    let baselib = game.add_assemblyref("BaseLib");
    let base_typeref = game.add_typeref(assemblyref_scope(baselib), "Game", "Base");
    game.add_typedef("Game", "Derived", typeref_coded(base_typeref));
    game.add_method("OnX", &sig_void(), OVERRIDE_FLAGS, ret_body());
    game.add_method("Caller", &sig_void(), PLAIN_FLAGS, call_body(3));
    game.add_typedef("Game", "Other", 0);
    let tail = game.add_method("Tail", &sig_void(), PLAIN_FLAGS, ret_body());
    assert_eq!(tail, 3);

    let path = dir.path().join("Game.dll");
    std::fs::write(&path, game.build()).unwrap();

    let options = options_for(dir.path());
    let summary = patch_assembly(&path, &options).unwrap();
    assert_eq!(summary.methods_added, 1);

    let patched = AssemblyImage::open(&summary.output_path).unwrap();
    let other = patched.find_typedef("Game", "Other").unwrap().unwrap();
    let (start, end) = patched.method_range(other).unwrap();
    assert_eq!((start, end), (4, 5));
    assert_eq!(patched.method_name(start).unwrap(), "Tail");

    let derived = patched.find_typedef("Game", "Derived").unwrap().unwrap();
    let (derived_start, _) = patched.method_range(derived).unwrap();
    let caller = derived_start + 1;
    assert_eq!(patched.method_name(caller).unwrap(), "Caller");

    let rva = patched.tables.row(TableId::MethodDef, caller).unwrap()[0];
    let offset = patched.file().rva_to_offset(rva).unwrap();
    let body = MethodBody::parse(patched.file().data(), offset).unwrap();
    let code = patched
        .file()
        .data_slice(offset + body.header_size as usize, body.code_size as usize)
        .unwrap();
    assert_eq!(code[0], 0x28); // call
    let token = u32::from_le_bytes(code[1..5].try_into().unwrap());
    assert_eq!(token, 0x0600_0004);
}

#[test]
fn verify_after_patch_needs_no_explicit_search_dirs() {
    let dir = TempDir::new().unwrap();
    write_base_lib(dir.path());
    let game = write_game(dir.path());

    // No search directories configured: the base assembly is only reachable
    // because it sits next to the input.
    let mut options = PatchOptions::new(dir.path().join("cache"));
    options.base_type = "Game.Base".to_string();

    let summary = patch_assembly(&game, &options).unwrap();
    assert_eq!(summary.methods_added, 1);

    let report = verify_patch(&summary, &options).unwrap();
    assert_eq!(report.total, 1);
    assert!(report.is_fully_compliant());
}

#[test]
fn unresolvable_chain_elsewhere_keeps_the_pass_alive() {
    let dir = TempDir::new().unwrap();
    write_base_lib(dir.path());

    // Game.Unrelated extends a type in an assembly that is not on disk; that must
    // only disqualify Unrelated, not abort the run.
    let mut game = AssemblyFixture::new("Game");
    let baselib = game.add_assemblyref("BaseLib");
    let base_typeref = game.add_typeref(assemblyref_scope(baselib), "Game", "Base");
    game.add_typedef("Game", "Derived", typeref_coded(base_typeref));
    game.add_method("OnX", &sig_void(), OVERRIDE_FLAGS, ret_body());
    let missing = game.add_assemblyref("MissingLib");
    let gone = game.add_typeref(assemblyref_scope(missing), "Other", "Gone");
    game.add_typedef("Game", "Unrelated", typeref_coded(gone));

    let path = dir.path().join("Game.dll");
    std::fs::write(&path, game.build()).unwrap();

    let options = options_for(dir.path());
    let summary = patch_assembly(&path, &options).unwrap();

    assert_eq!(summary.candidate_types, vec!["Game.Derived"]);
    assert_eq!(summary.methods_added, 1);
    assert!(summary.output_path.is_file());
}

#[test]
fn event_set_excludes_generic_vararg_and_nonvoid_virtuals() {
    let dir = TempDir::new().unwrap();

    let mut base = AssemblyFixture::new("BaseLib");
    base.add_typedef("Game", "Base", 0);
    base.add_method("OnX", &sig_void(), BASE_EVENT_FLAGS, ret_body());
    // GENERIC | HASTHIS, one generic parameter, no params, void
    base.add_method("OnGeneric", &[0x30, 0x01, 0x00, 0x01], BASE_EVENT_FLAGS, ret_body());
    // VARARG | HASTHIS, no params, void
    base.add_method("OnVararg", &[0x25, 0x00, 0x01], BASE_EVENT_FLAGS, ret_body());
    // HASTHIS, no params, returns int32
    base.add_method("OnCount", &[0x20, 0x00, 0x08], BASE_EVENT_FLAGS, ret_body());
    std::fs::write(dir.path().join("BaseLib.dll"), base.build()).unwrap();

    let mut game = AssemblyFixture::new("Game");
    let baselib = game.add_assemblyref("BaseLib");
    let base_typeref = game.add_typeref(assemblyref_scope(baselib), "Game", "Base");
    game.add_typedef("Game", "Derived", typeref_coded(base_typeref));
    game.add_method("Update", &sig_void(), PLAIN_FLAGS, ret_body());
    let path = dir.path().join("Game.dll");
    std::fs::write(&path, game.build()).unwrap();

    let options = options_for(dir.path());
    let summary = patch_assembly(&path, &options).unwrap();

    // Only the plain void event survives the filter.
    assert_eq!(summary.event_names, vec!["OnX"]);
    assert_eq!(summary.methods_added, 1);

    let patched = AssemblyImage::open(&summary.output_path).unwrap();
    let derived = patched.find_typedef("Game", "Derived").unwrap().unwrap();
    let (start, end) = patched.method_range(derived).unwrap();
    let names: Vec<String> = (start..end)
        .map(|rid| patched.method_name(rid).unwrap())
        .collect();
    assert_eq!(names, vec!["Update", "OnX"]);
}

#[test]
fn verify_reports_noncompliant_subclasses() {
    let dir = TempDir::new().unwrap();
    write_base_lib(dir.path());
    let game = write_game(dir.path());
    let options = options_for(dir.path());

    let report = verify_assembly(&game, &options).unwrap();

    assert_eq!(report.event_names, vec!["OnX", "OnY"]);
    assert_eq!(report.total, 1);
    assert_eq!(report.compliant, 0);
    assert_eq!(report.noncompliant, vec!["Game.Derived"]);
    assert!(!report.is_fully_compliant());
}
