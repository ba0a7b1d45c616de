//! System check command implementation.

use herakles_host_telemetry::config::{validate_effective_config, Config};
use herakles_host_telemetry::process::{self, ProcUnits};
use herakles_host_telemetry::profiler::bridge::has_elevated_privileges;
use herakles_host_telemetry::system;
use std::time::Instant;

/// Validates configuration and system requirements. Returns whether every check passed.
pub fn command_check(proc: bool, profiler: bool, all: bool, config: &Config) -> bool {
    println!("🔍 Herakles Host Telemetry - System Check");
    println!("==========================================");

    let mut all_ok = true;
    let root = config.proc_root();

    if proc || all {
        println!("\n📁 Checking {} filesystem...", root.display());
        if !root.exists() {
            println!("   ❌ {} not found", root.display());
            all_ok = false;
        } else {
            match system::read_cpu_stats(&root) {
                Ok(stats) => println!(
                    "   ✅ CPU counters readable ({} logical cores)",
                    system::logical_core_count(&stats)
                ),
                Err(e) => {
                    println!("   ❌ CPU counters unreadable: {}", e);
                    all_ok = false;
                }
            }

            match system::read_memory_info(&root) {
                Ok(mem) => println!(
                    "   ✅ Memory counters readable ({} MB total)",
                    mem.total_bytes / 1024 / 1024
                ),
                Err(e) => {
                    println!("   ❌ Memory counters unreadable: {}", e);
                    all_ok = false;
                }
            }

            match process::collect_proc_entries(&root) {
                Ok(entries) if !entries.is_empty() => {
                    println!("   ✅ Can enumerate {} process entries", entries.len());
                    let own = entries.iter().find(|e| e.pid == std::process::id());
                    if let Some(entry) = own {
                        let units = ProcUnits::default();
                        match process::read_process_sample(entry, units, Instant::now()) {
                            Ok(s) => println!(
                                "   ✅ Process sampling works ({}: {:.1} MB)",
                                s.name,
                                s.memory_mb()
                            ),
                            Err(e) => {
                                println!("   ❌ Process sampling failed: {}", e);
                                all_ok = false;
                            }
                        }
                    }
                }
                Ok(_) => {
                    println!("   ❌ Cannot read any process entries");
                    all_ok = false;
                }
                Err(e) => {
                    println!("   ❌ Process enumeration failed: {}", e);
                    all_ok = false;
                }
            }

            match system::read_disk_usages(&root) {
                Ok(disks) => println!("   ✅ {} block-device filesystems found", disks.len()),
                Err(e) => println!("   ⚠️  Disk usage unavailable: {}", e),
            }
        }
    }

    if profiler || all {
        println!("\n🔬 Checking hardware profiler...");
        if !config.profiler_enabled() {
            println!("   ⚠️  Profiler metrics disabled by configuration");
        } else {
            let path = config.profiler_path();
            if path.is_file() {
                println!("   ✅ Profiler found at {}", path.display());
            } else {
                println!("   ❌ Profiler not found at {}", path.display());
                all_ok = false;
            }
            if has_elevated_privileges() {
                println!("   ✅ Running with elevated privileges");
            } else {
                println!("   ❌ Not running as root; cache metrics will be disabled");
                all_ok = false;
            }
        }
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
    } else {
        println!("   ❌ Some checks failed - please review warnings");
    }
    all_ok
}
