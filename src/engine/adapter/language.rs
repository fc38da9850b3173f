use crate::engine::models::Language;

/// Static per-language lookup data shared by the schema adapters and the
/// language catalogue endpoint.
#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub display_name: &'static str,
    pub template: &'static str,
    pub structured_language: &'static str,
    pub structured_version: &'static str,
    pub source_name: &'static str,
    pub flat_language: &'static str,
}

impl LanguageSpec {
    pub fn for_language(language: Language) -> Self {
        match language {
            Language::JavaScript => Self {
                display_name: "JavaScript",
                template: "console.log(\"Hello, World!\");",
                structured_language: "nodejs",
                structured_version: "18.15.0",
                source_name: "script.js",
                flat_language: "node",
            },
            Language::Python => Self {
                display_name: "Python",
                template: "print(\"Hello, World!\")",
                structured_language: "python3",
                structured_version: "3.10.0",
                source_name: "script.py",
                flat_language: "python3",
            },
            Language::Java => Self {
                display_name: "Java",
                template: "public class Main {\n  public static void main(String[] args) {\n    System.out.println(\"Hello, World!\");\n  }\n}",
                structured_language: "java",
                structured_version: "15.0.2",
                source_name: "Main.java",
                flat_language: "java",
            },
            Language::Cpp => Self {
                display_name: "C++",
                template: "#include <iostream>\n\nint main() {\n  std::cout << \"Hello, World!\" << std::endl;\n  return 0;\n}",
                structured_language: "cpp",
                structured_version: "10.2.0",
                source_name: "main.cpp",
                flat_language: "cpp",
            },
            Language::C => Self {
                display_name: "C",
                template: "#include <stdio.h>\n\nint main() {\n  printf(\"Hello, World!\\n\");\n  return 0;\n}",
                structured_language: "c",
                structured_version: "10.2.0",
                source_name: "main.c",
                flat_language: "c",
            },
            Language::Go => Self {
                display_name: "Go",
                template: "package main\n\nimport \"fmt\"\n\nfunc main() {\n  fmt.Println(\"Hello, World!\")\n}",
                structured_language: "go",
                structured_version: "1.16.2",
                source_name: "main.go",
                flat_language: "go",
            },
            Language::Ruby => Self {
                display_name: "Ruby",
                template: "puts \"Hello, World!\"",
                structured_language: "ruby",
                structured_version: "3.0.1",
                source_name: "script.rb",
                flat_language: "ruby",
            },
        }
    }
}
