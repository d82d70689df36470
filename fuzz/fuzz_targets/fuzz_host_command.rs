#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_core::{HostCommand, HostRequest, HostStatus};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let request = HostRequest::new(data[0], data[1]).with_payload(data[2..].to_vec());

    // Parsing arbitrary requests must never panic
    match HostCommand::parse(&request) {
        Ok(command) => {
            // Re-encoding yields a request that decodes to the same command
            let reencoded = command.to_request();
            assert_eq!(reencoded.command, request.command);
            assert_eq!(HostCommand::parse(&reencoded).unwrap(), command);
        }
        Err(e) => {
            // Rejections never claim success
            assert_ne!(e.status(), HostStatus::Success);
        }
    }
});
