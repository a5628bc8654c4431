//! Customization script generation
//!
//! Pure rendering of a [`BuildConfiguration`] into the shell scripts and
//! cloud-init seed documents injected into (or shipped alongside) the image.
//! No I/O happens here; identical configurations always render identical
//! bytes, which is what the golden tests rely on. Absent optional sections
//! render to empty strings.

use crate::core::model::BuildConfiguration;

/// Rendered customization scripts and seed documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSet {
    /// Board/distribution build options, sourced by the other scripts
    pub build_options: String,
    /// Package install/remove commands
    pub packages: String,
    /// First-boot user creation, with optional sudo grant
    pub user_setup: String,
    /// SSH hardening commands
    pub ssh_hardening: String,
    /// Hostname and Wi-Fi commands
    pub network_setup: String,
    /// Entry script run once on first boot, invoking the others
    pub firstboot: String,
    /// Cloud-init style seed document
    pub user_data: String,
    /// Seed metadata document
    pub meta_data: String,
}

impl ScriptSet {
    /// Render all scripts for one configuration.
    pub fn render(config: &BuildConfiguration) -> Self {
        Self {
            build_options: render_build_options(config),
            packages: render_packages(config),
            user_setup: render_user_setup(config),
            ssh_hardening: render_ssh_hardening(config),
            network_setup: render_network_setup(config),
            firstboot: render_firstboot(config),
            user_data: render_user_data(config),
            meta_data: render_meta_data(config),
        }
    }

    /// (filename, content) pairs in injection order. Callers skip entries
    /// with empty content.
    pub fn files(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("build-options.sh", self.build_options.as_str()),
            ("packages.sh", self.packages.as_str()),
            ("user-setup.sh", self.user_setup.as_str()),
            ("ssh-hardening.sh", self.ssh_hardening.as_str()),
            ("network-setup.sh", self.network_setup.as_str()),
            ("firstboot.sh", self.firstboot.as_str()),
            ("user-data", self.user_data.as_str()),
            ("meta-data", self.meta_data.as_str()),
        ]
    }
}

fn render_build_options(config: &BuildConfiguration) -> String {
    let desktop = config.distribution.desktop.as_deref().unwrap_or("");
    format!(
        "#!/bin/sh\n\
         # Build options for {name}\n\
         BOARD=\"{name}\"\n\
         BOARD_FAMILY=\"{family}\"\n\
         ARCH=\"{arch}\"\n\
         RELEASE=\"{release}\"\n\
         VARIANT=\"{variant}\"\n\
         DESKTOP=\"{desktop}\"\n",
        name = config.board.name,
        family = config.board.family,
        arch = config.board.arch,
        release = config.distribution.release,
        variant = config.distribution.variant.label(),
    )
}

fn render_packages(config: &BuildConfiguration) -> String {
    if config.packages.install.is_empty() && config.packages.remove.is_empty() {
        return String::new();
    }

    let mut script = String::from("#!/bin/sh\nset -e\nexport DEBIAN_FRONTEND=noninteractive\n");
    if !config.packages.remove.is_empty() {
        script.push_str(&format!(
            "apt-get remove -y --purge {}\n",
            config.packages.remove.join(" ")
        ));
    }
    if !config.packages.install.is_empty() {
        script.push_str("apt-get update\n");
        script.push_str(&format!(
            "apt-get install -y {}\n",
            config.packages.install.join(" ")
        ));
    }
    script
}

fn render_user_setup(config: &BuildConfiguration) -> String {
    let Some(user) = &config.user else {
        return String::new();
    };

    let mut script = format!(
        "#!/bin/sh\nset -e\nuseradd -m -s /bin/bash \"{name}\"\n\
         echo \"{name}:{password}\" | chpasswd\n",
        name = user.name,
        password = user.password,
    );
    if user.sudo {
        script.push_str(&format!(
            "usermod -aG sudo \"{name}\"\n\
             echo \"{name} ALL=(ALL) NOPASSWD:ALL\" > \"/etc/sudoers.d/{name}\"\n\
             chmod 0440 \"/etc/sudoers.d/{name}\"\n",
            name = user.name,
        ));
    }
    script
}

fn render_ssh_hardening(config: &BuildConfiguration) -> String {
    let ssh = &config.ssh;
    if !ssh.disable_password_auth && !ssh.disable_root_login && ssh.port.is_none() {
        return String::new();
    }

    let mut script = String::from("#!/bin/sh\nset -e\n");
    if ssh.disable_password_auth {
        script.push_str(
            "sed -i 's/^#\\?PasswordAuthentication.*/PasswordAuthentication no/' /etc/ssh/sshd_config\n",
        );
    }
    if ssh.disable_root_login {
        script.push_str(
            "sed -i 's/^#\\?PermitRootLogin.*/PermitRootLogin no/' /etc/ssh/sshd_config\n",
        );
    }
    if let Some(port) = ssh.port {
        script.push_str(&format!(
            "sed -i 's/^#\\?Port.*/Port {port}/' /etc/ssh/sshd_config\n"
        ));
    }
    script.push_str("systemctl restart ssh || systemctl restart sshd\n");
    script
}

fn render_network_setup(config: &BuildConfiguration) -> String {
    let system = &config.system;
    if system.hostname.is_none() && system.wifi.is_none() {
        return String::new();
    }

    let mut script = String::from("#!/bin/sh\nset -e\n");
    if let Some(hostname) = &system.hostname {
        script.push_str(&format!(
            "hostnamectl set-hostname \"{hostname}\"\n\
             sed -i \"s/127.0.1.1.*/127.0.1.1\\t{hostname}/\" /etc/hosts\n"
        ));
    }
    if let Some(wifi) = &system.wifi {
        script.push_str(&format!(
            "nmcli device wifi connect \"{ssid}\" password \"{password}\" || true\n",
            ssid = wifi.ssid,
            password = wifi.password,
        ));
    }
    script
}

fn render_firstboot(config: &BuildConfiguration) -> String {
    let mut script = String::from(
        "#!/bin/sh\n\
         # One-shot first-boot customization entry point\n\
         set -e\n\
         cd \"$(dirname \"$0\")\"\n\
         . ./build-options.sh\n",
    );
    for part in [
        "network-setup.sh",
        "user-setup.sh",
        "packages.sh",
        "ssh-hardening.sh",
    ] {
        script.push_str(&format!("[ -s ./{part} ] && sh ./{part}\n"));
    }
    for line in &config.custom_script {
        script.push_str(line);
        script.push('\n');
    }
    script.push_str("exit 0\n");
    script
}

fn render_user_data(config: &BuildConfiguration) -> String {
    let mut doc = String::from("#cloud-config\n");
    if let Some(hostname) = &config.system.hostname {
        doc.push_str(&format!("hostname: {hostname}\n"));
    }
    if let Some(user) = &config.user {
        doc.push_str("users:\n");
        doc.push_str(&format!("  - name: {}\n", user.name));
        doc.push_str(&format!("    plain_text_passwd: {}\n", user.password));
        doc.push_str("    lock_passwd: false\n");
        if user.sudo {
            doc.push_str("    sudo: ALL=(ALL) NOPASSWD:ALL\n");
        }
    }
    if !config.packages.install.is_empty() {
        doc.push_str("packages:\n");
        for package in &config.packages.install {
            doc.push_str(&format!("  - {package}\n"));
        }
    }
    doc
}

fn render_meta_data(config: &BuildConfiguration) -> String {
    format!(
        "instance-id: {name}-{release}\nlocal-hostname: {hostname}\n",
        name = config.board.name,
        release = config.distribution.release,
        hostname = config
            .system
            .hostname
            .as_deref()
            .unwrap_or(&config.board.name),
    )
}
