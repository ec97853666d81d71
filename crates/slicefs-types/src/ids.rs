strong_type!(SessionId, u64);
strong_type!(LockOwner, u64);
