mod consensus_flow;
mod recovery;
mod transfer_flow;
