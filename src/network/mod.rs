pub mod node;
pub mod simulator;

pub use node::*;
pub use simulator::*;

/*
    Validators talk over simulated point-to-point links with no ordering
    or delivery guarantee. Each send is independently delayed, possibly
    dropped, possibly delivered twice, and silently lost across a
    partition. A sender never learns the fate of its message.

    We assume partial synchrony: after some unknown point in time, links
    between correct validators deliver within a bound. Safety holds
    regardless of timing. Progress needs that eventual bound, which the
    growing round timeouts will eventually exceed.
*/
