use crate::config::FixBudget;
use crate::detectors::framework::TestFramework;
use crate::state::TestTarget;
use crate::testgen::generator::{FixRequest, GenerateRequest};

/// Failure messages are clipped to this many characters each.
const FAILURE_MESSAGE_LIMIT: usize = 1_500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
}

pub fn build_generate_prompt(req: &GenerateRequest<'_>) -> LlmPrompt {
    LlmPrompt {
        system: system_prompt(req.framework),
        user: generate_user_prompt(req),
    }
}

pub fn build_fix_prompt(req: &FixRequest<'_>) -> LlmPrompt {
    LlmPrompt {
        system: system_prompt(req.framework),
        user: fix_user_prompt(req),
    }
}

/* ============================================================
   System prompt (stable, reused)
   ============================================================ */

fn system_prompt(framework: TestFramework) -> String {
    let mock = framework.mock_object();
    format!(
        r#"
You are an expert TypeScript/JavaScript engineer writing {framework} unit tests.

Rules:
- Output a single fenced code block containing the test file, nothing else
- Import test globals from '{module}'
- Use `{mock}.fn`, `{mock}.mock` and `{mock}.spyOn` for mocks; never use another framework's helpers
- Group tests in one describe block named exactly after the function (or `Class.method`)
- Test only the public surface; never read or write private members
- Tests must be deterministic: no network, no real timers, no wall-clock dates
- Do NOT modify production code
"#,
        module = framework.globals_module(),
    )
    .trim()
    .to_string()
}

/* ============================================================
   Generate
   ============================================================ */

fn generate_user_prompt(req: &GenerateRequest<'_>) -> String {
    let t = req.target;
    let mut out = String::new();

    /* ---------- CONTEXT ---------- */
    out.push_str("CONTEXT\n");
    out.push_str(&format!("Source file: {}\n", t.file_path));
    out.push_str(&format!("Test file: {}\n", req.test_file_path));
    out.push_str(&format!("Import from: '{}'\n", req.import_path));
    out.push_str(&format!("Framework: {}\n", req.framework));
    out.push_str(&format!("Target: {}\n\n", describe_target(t)));

    if !t.surrounding_context.trim().is_empty() {
        out.push_str("SURROUNDING CODE\n```ts\n");
        out.push_str(t.surrounding_context.trim_end());
        out.push_str("\n```\n\n");
    }

    out.push_str("DECLARATION\n```ts\n");
    out.push_str(t.source_snippet.trim_end());
    out.push_str("\n```\n\n");

    /* ---------- TEST STATUS ---------- */
    out.push_str("TEST STATUS\n");
    match req.existing_content {
        Some(existing) => {
            out.push_str("The test file already exists:\n```ts\n");
            out.push_str(existing.trim_end());
            out.push_str(
                "\n```\nReturn ONLY the new imports and the new describe block. \
                 Do not repeat existing blocks.\n\n",
            );
        }
        None => out.push_str("No test file exists yet. Return the complete file.\n\n"),
    }

    /* ---------- CONSTRAINTS ---------- */
    out.push_str("CONSTRAINTS\n");
    out.push_str(&target_constraints(t));
    if req.scaffold_only {
        out.push_str(
            "- Scaffold only: one describe block with `it.todo` cases naming the behaviors to test\n",
        );
    } else {
        out.push_str("- Cover the main path, edge cases and error cases\n");
    }

    out
}

fn describe_target(t: &TestTarget) -> String {
    let mut s = format!("{} `{}`", t.decl_kind, t.qualified_name());
    if t.exported {
        s.push_str(" (exported)");
    }
    s.push_str(&format!(", lines {}-{}", t.start_line, t.end_line));
    s
}

fn target_constraints(t: &TestTarget) -> String {
    let mut out = String::new();

    if let Some(owner) = &t.owner_class {
        out.push_str(&format!("- Construct `{owner}` through its public constructor\n"));
    }
    if t.is_private {
        out.push_str("- The target is private: exercise it only through public methods that call it\n");
    }
    if !t.private_members.is_empty() {
        out.push_str(&format!(
            "- Never access these private members: {}\n",
            t.private_members.join(", ")
        ));
    }
    if !t.exported && t.owner_class.is_none() {
        out.push_str("- The target is not exported: test it through an exported caller\n");
    }

    out
}

/* ============================================================
   Fix
   ============================================================ */

fn fix_user_prompt(req: &FixRequest<'_>) -> String {
    let mut out = String::new();

    /* ---------- CONTEXT ---------- */
    out.push_str("CONTEXT\n");
    out.push_str(&format!("Test file: {}\n", req.test_file_path));
    out.push_str(&format!("Framework: {}\n", req.framework));
    out.push_str(&format!(
        "Attempt: {} of {}\n\n",
        req.attempt,
        match req.max_attempts {
            FixBudget::Limited(n) => n.to_string(),
            FixBudget::Unbounded => "unbounded".into(),
        }
    ));

    for src in req.declaration_sources {
        out.push_str("DECLARATION UNDER TEST\n```ts\n");
        out.push_str(src.trim_end());
        out.push_str("\n```\n\n");
    }

    out.push_str("CURRENT TEST FILE\n```ts\n");
    out.push_str(req.current_content.trim_end());
    out.push_str("\n```\n\n");

    /* ---------- TEST STATUS ---------- */
    out.push_str("TEST STATUS\n");
    if req.failures.is_empty() {
        out.push_str("The file failed to run.\n");
    }
    for f in req.failures {
        out.push_str(&format!("- {}: {}\n", f.test_name, clip(&f.message)));
    }
    out.push('\n');

    if !req.validation_errors.is_empty() {
        out.push_str("PREVIOUS REPAIR WAS REJECTED\n");
        for e in req.validation_errors {
            out.push_str(&format!("- {e}\n"));
        }
        out.push('\n');
    }

    /* ---------- CONSTRAINTS ---------- */
    out.push_str("CONSTRAINTS\n");
    out.push_str("- Return the COMPLETE test file, keeping every passing test verbatim\n");
    out.push_str("- Fix the tests, not the production code\n");
    if !req.private_members.is_empty() {
        out.push_str(&format!(
            "- Never access these private members: {}\n",
            req.private_members.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }

    out
}

fn clip(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() <= FAILURE_MESSAGE_LIMIT {
        return s.to_string();
    }
    let mut out: String = s.chars().take(FAILURE_MESSAGE_LIMIT).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeclKind;
    use crate::testgen::runner::TestFailure;
    use std::collections::BTreeSet;

    fn method() -> TestTarget {
        TestTarget {
            file_path: "src/cart.ts".into(),
            decl_name: "total".into(),
            decl_kind: DeclKind::ClassMethod,
            owner_class: Some("Cart".into()),
            is_private: false,
            exported: true,
            private_members: vec!["items".into()],
            source_snippet: "total() { return 1; }".into(),
            surrounding_context: "import { x } from './x';".into(),
            start_line: 4,
            end_line: 6,
            overlapping_ranges: Vec::new(),
            existing_test_file_path: None,
        }
    }

    #[test]
    fn generate_prompt_names_target_and_constraints() {
        let t = method();
        let p = build_generate_prompt(&GenerateRequest {
            target: &t,
            framework: TestFramework::Vitest,
            existing_content: None,
            test_file_path: "src/cart.test.ts",
            import_path: "./cart",
            scaffold_only: false,
        });

        assert!(p.system.contains("from 'vitest'") || p.system.contains("'vitest'"));
        assert!(p.system.contains("vi.fn"));
        assert!(p.user.contains("class method `Cart.total` (exported), lines 4-6"));
        assert!(p.user.contains("Import from: './cart'"));
        assert!(p.user.contains("Never access these private members: items"));
        assert!(p.user.contains("No test file exists yet"));
    }

    #[test]
    fn fix_prompt_carries_whole_file_and_failures() {
        let failures = vec![TestFailure {
            test_name: "Cart total sums".into(),
            message: "expected 2 to be 3".into(),
            stack: None,
        }];
        let sources = vec!["total() {}".to_string()];
        let rejected = vec!["3:1: unclosed '{'".to_string()];
        let members = BTreeSet::from(["items".to_string()]);

        let p = build_fix_prompt(&FixRequest {
            test_file_path: "src/cart.test.ts",
            framework: TestFramework::Jest,
            current_content: "describe('Cart', () => {});",
            declaration_sources: &sources,
            failures: &failures,
            validation_errors: &rejected,
            private_members: &members,
            attempt: 2,
            max_attempts: FixBudget::Limited(3),
        });

        assert!(p.user.contains("Attempt: 2 of 3"));
        assert!(p.user.contains("describe('Cart', () => {});"));
        assert!(p.user.contains("- Cart total sums: expected 2 to be 3"));
        assert!(p.user.contains("PREVIOUS REPAIR WAS REJECTED"));
        assert!(p.user.contains("COMPLETE test file"));
    }

    #[test]
    fn long_messages_are_clipped() {
        let long = "x".repeat(FAILURE_MESSAGE_LIMIT + 10);
        assert_eq!(clip(&long).chars().count(), FAILURE_MESSAGE_LIMIT + 3);
    }
}
