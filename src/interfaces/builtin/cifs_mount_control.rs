//! `cifs-mount-control`: mount and unmount CIFS shares under the snap's own
//! writable directories.
//!
//! The slot is provided only by the system and is never auto-connected.

use crate::interfaces::definition::{
    InterfaceDefinition, Scope, Side, BACKEND_APPARMOR, BACKEND_SECCOMP,
};

pub const NAME: &str = "cifs-mount-control";

const SUMMARY: &str = "allows to mount and unmount CIFS shares";

const BASE_DECLARATION_SLOTS: &str = r#"
  cifs-mount-control:
    allow-installation:
      slot-snap-type:
        - core
    deny-auto-connection: true
"#;

const CONNECTED_PLUG_SECCOMP: &str = r#"
# Description: Allow mount and umount access.

mount
umount
"#;

const CONNECTED_PLUG_APPARMOR: &str = r#"
# Description: Allow to mount and unmount CIFS filesystems.

# Required for mounts
capability sys_admin,

# Allow mounts to our snap-specific writable directories
mount fstype=cifs ** -> /home/*/snap/@{SNAP_NAME}/@{SNAP_REVISION}/{,**/},
mount fstype=cifs ** -> /var/snap/@{SNAP_NAME}/@{SNAP_REVISION}/{,**/},
mount fstype=cifs ** -> /home/*/snap/@{SNAP_NAME}/common/{,**/},
mount fstype=cifs ** -> /var/snap/@{SNAP_NAME}/common/{,**/},

umount fstype=cifs /home/*/snap/@{SNAP_NAME}/@{SNAP_REVISION}/{,**/},
umount fstype=cifs /var/snap/@{SNAP_NAME}/@{SNAP_REVISION}/{,**/},
umount fstype=cifs /home/*/snap/@{SNAP_NAME}/common/{,**/},
umount fstype=cifs /var/snap/@{SNAP_NAME}/common/{,**/},
"#;

pub fn definition() -> InterfaceDefinition {
    InterfaceDefinition::new(NAME)
        .with_summary(SUMMARY)
        .implicit(true, true)
        .reserved_for_os()
        .with_slot_rules(BASE_DECLARATION_SLOTS)
        .with_fragment(BACKEND_APPARMOR, Side::Plug, Scope::Connected, CONNECTED_PLUG_APPARMOR)
        .with_fragment(BACKEND_SECCOMP, Side::Plug, Scope::Connected, CONNECTED_PLUG_SECCOMP)
}
