use std::env;
use std::process::Command;

// git2 links OpenSSL on macOS. Building an x86_64 binary from an Apple
// Silicon host while the OpenSSL env points into /opt/homebrew links arm64
// libraries and fails late with unresolved _OPENSSL_init_ssl, so catch the
// mismatch up front.

const ENV_KEYS: [&str; 7] = [
    "OPENSSL_DIR",
    "OPENSSL_LIB_DIR",
    "OPENSSL_INCLUDE_DIR",
    "PKG_CONFIG_PATH",
    "LDFLAGS",
    "CPPFLAGS",
    "LIBRARY_PATH",
];

fn main() {
    for key in ENV_KEYS {
        println!("cargo:rerun-if-env-changed={key}");
    }

    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos")
        || env::var("CARGO_CFG_TARGET_ARCH").as_deref() != Ok("x86_64")
        || !host_is_apple_silicon()
    {
        return;
    }

    // An explicit x86_64 OpenSSL location wins.
    for key in &ENV_KEYS[..3] {
        if let Ok(value) = env::var(key) {
            if value.contains("/usr/local") || value.contains("/opt/local") {
                return;
            }
        }
    }

    let bad_keys: Vec<&str> = ENV_KEYS
        .iter()
        .copied()
        .filter(|key| {
            env::var(key)
                .map(|value| value.contains("/opt/homebrew"))
                .unwrap_or(false)
        })
        .collect();
    let pkg_config_bad = pkg_config_reports_homebrew();
    if bad_keys.is_empty() && !pkg_config_bad {
        return;
    }

    let mut message = String::from(
        "Building x86_64 on an Apple Silicon host with OpenSSL from /opt/homebrew (arm64).\n\
         Either switch to an arm64 toolchain (rustup default stable-aarch64-apple-darwin)\n\
         or point OPENSSL_DIR/PKG_CONFIG_PATH/LDFLAGS/CPPFLAGS at x86_64 OpenSSL under /usr/local.\n",
    );
    if !bad_keys.is_empty() {
        message.push_str(&format!("Found /opt/homebrew in: {}\n", bad_keys.join(", ")));
    }
    if pkg_config_bad {
        message.push_str("pkg-config reports /opt/homebrew OpenSSL.\n");
    }
    panic!("{message}");
}

fn host_is_apple_silicon() -> bool {
    Command::new("uname")
        .arg("-m")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| {
            let arch = String::from_utf8_lossy(&output.stdout).trim().to_string();
            arch == "arm64" || arch == "aarch64"
        })
        .unwrap_or(false)
}

fn pkg_config_reports_homebrew() -> bool {
    Command::new("pkg-config")
        .args(["--libs", "openssl"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).contains("/opt/homebrew"))
        .unwrap_or(false)
}
