use serde::{Deserialize, Serialize};

/// Path at which every sandbox instance sees its submission's working directory
pub const SANDBOX_MOUNT: &str = "/sandbox";

/// Languages the judge knows how to build and run
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    #[serde(rename = "c")]
    C,
    #[serde(rename = "c11")]
    C11,
    #[serde(rename = "c++11")]
    Cpp11,
    #[serde(rename = "c++14")]
    Cpp14,
    #[serde(rename = "c++17")]
    Cpp17,
    #[serde(rename = "c++20")]
    Cpp20,
    #[serde(rename = "python2")]
    Python2,
    #[serde(rename = "python3")]
    Python3,
    #[serde(rename = "java")]
    Java,
    #[serde(rename = "javascript")]
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 10] = [
        Self::C,
        Self::C11,
        Self::Cpp11,
        Self::Cpp14,
        Self::Cpp17,
        Self::Cpp20,
        Self::Python2,
        Self::Python3,
        Self::Java,
        Self::JavaScript,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::C => "c",
            Self::C11 => "c11",
            Self::Cpp11 => "c++11",
            Self::Cpp14 => "c++14",
            Self::Cpp17 => "c++17",
            Self::Cpp20 => "c++20",
            Self::Python2 => "python2",
            Self::Python3 => "python3",
            Self::Java => "java",
            Self::JavaScript => "javascript",
        }
    }

    /// Image used when the configuration does not override it
    pub fn default_image(&self) -> &'static str {
        match self {
            Self::C | Self::C11 => "judgex-sandbox:c",
            Self::Cpp11 | Self::Cpp14 | Self::Cpp17 | Self::Cpp20 => "judgex-sandbox:cpp",
            Self::Python2 | Self::Python3 => "judgex-sandbox:python",
            Self::Java => "judgex-sandbox:java",
            Self::JavaScript => "judgex-sandbox:node",
        }
    }

    /// Name of the file the source code is written to
    pub fn source_file(&self) -> &'static str {
        match self {
            Self::C | Self::C11 => "main.c",
            Self::Cpp11 | Self::Cpp14 | Self::Cpp17 | Self::Cpp20 => "main.cpp",
            Self::Python2 | Self::Python3 => "main.py",
            Self::Java => "Main.java",
            Self::JavaScript => "main.js",
        }
    }

    /// File the compiler must leave behind, `None` for interpreted languages
    pub fn artifact(&self) -> Option<&'static str> {
        match self {
            Self::C | Self::C11 | Self::Cpp11 | Self::Cpp14 | Self::Cpp17 | Self::Cpp20 => {
                Some("main")
            }
            Self::Java => Some("Main.class"),
            Self::Python2 | Self::Python3 | Self::JavaScript => None,
        }
    }

    pub fn is_interpreted(&self) -> bool {
        self.artifact().is_none()
    }

    /// Shell command compiling the source inside the sandbox
    pub fn compile_command(&self) -> Option<String> {
        let source = format!("{SANDBOX_MOUNT}/{}", self.source_file());
        let output = format!("{SANDBOX_MOUNT}/main");
        let command = match self {
            Self::C => format!("gcc -std=c99 -O2 -o {output} {source} -lm"),
            Self::C11 => format!("gcc -std=c11 -O2 -o {output} {source} -lm"),
            Self::Cpp11 => format!("g++ -std=c++11 -O2 -o {output} {source}"),
            Self::Cpp14 => format!("g++ -std=c++14 -O2 -o {output} {source}"),
            Self::Cpp17 => format!("g++ -std=c++17 -O2 -o {output} {source}"),
            Self::Cpp20 => format!("g++ -std=c++20 -O2 -o {output} {source}"),
            Self::Java => format!("javac -J-Xmx256m -d {SANDBOX_MOUNT} {source}"),
            Self::Python2 | Self::Python3 | Self::JavaScript => return None,
        };
        Some(command)
    }

    /// Command running the built program, without any redirection
    pub fn run_command(&self) -> String {
        match self {
            Self::C | Self::C11 | Self::Cpp11 | Self::Cpp14 | Self::Cpp17 | Self::Cpp20 => {
                format!("{SANDBOX_MOUNT}/main")
            }
            Self::Python2 => format!("python2 {SANDBOX_MOUNT}/main.py"),
            Self::Python3 => format!("python3 {SANDBOX_MOUNT}/main.py"),
            Self::Java => format!("java -cp {SANDBOX_MOUNT} Main"),
            Self::JavaScript => format!("node {SANDBOX_MOUNT}/main.js"),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
