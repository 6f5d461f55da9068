extern crate medformat;

use std::env;

use medformat::MedSession;

fn main() {
    let path = env::args().nth(1).expect("one argument: a .medd session directory");
    let session = MedSession::open(&path).expect("openable MED session");
    for channel in session.channels() {
        println!("{} ({} segments)", channel.name, channel.segments.len());
    }
}
