#[test]
fn form_object_derive_ui() {
    let testcases = trybuild::TestCases::new();
    testcases.pass("tests/ui/form_object/pass.rs");
    testcases.compile_fail("tests/ui/form_object/fail_generic.rs");
    testcases.compile_fail("tests/ui/form_object/fail_tuple.rs");
    testcases.compile_fail("tests/ui/form_object/fail_enum.rs");
}
