// RDMA completion queues.
pub mod cq;

// RDMA devices and device discovery.
pub mod device;

// Local and remote RDMA memory regions.
pub mod mr;

// RDMA protection domains.
pub mod pd;

// RDMA queue pairs.
pub mod qp;

// RDMA shared receive queues.
pub mod srq;
