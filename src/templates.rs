// ABOUTME: Script template collaborator: named templates plus variable bindings.
// ABOUTME: Bodies are embedded at compile time and rendered with minijinja.

use minijinja::Environment;

/// Classification script uploaded to the controller and executed there.
pub const CLASSIFY_SCRIPT: &str = include_str!("../scripts/classify_compile_master.sh");

/// Remote filename for the classification script.
pub const CLASSIFY_SCRIPT_REMOTE: &str = "/tmp/classify_compile_master.sh";

macro_rules! embedded_templates {
    ($($name:literal),+ $(,)?) => {
        &[$(($name, include_str!(concat!("../templates/", $name, ".j2")))),+]
    };
}

const TEMPLATES: &[(&str, &str)] = embedded_templates![
    "install_agent.sh",
    "install_master.sh",
    "install_compile_master.sh",
    "sign_cert.sh",
    "check_csr.sh",
    "postinstall.sh",
    "csr_attributes.yaml",
    "move_csr_attributes.sh",
    "lb_external_fact.sh",
    "setup_code_manager.sh",
    "offline_gems.sh",
    "status.sh",
];

/// Renders named script templates for the orchestrator. The rendered text
/// is opaque to everything downstream of here.
pub struct ScriptRenderer {
    env: Environment<'static>,
}

impl ScriptRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, body) in TEMPLATES {
            env.add_template(name, body)
                .expect("embedded template is valid");
        }
        Self { env }
    }

    pub fn render(
        &self,
        name: &str,
        ctx: minijinja::Value,
    ) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(ctx)
    }
}

impl Default for ScriptRenderer {
    fn default() -> Self {
        Self::new()
    }
}
