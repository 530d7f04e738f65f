//! Lock-free SPSC sample ring between the writer thread and the device
//! callback.

use rtrb::{Consumer, Producer, RingBuffer};

/// PCM ring buffer over i16 samples (real-time safe).
pub struct PcmRingBuffer {
    producer: Producer<i16>,
    consumer: Consumer<i16>,
}

impl PcmRingBuffer {
    pub fn new(capacity_samples: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity_samples);
        Self { producer, consumer }
    }

    pub fn split(self) -> (PcmProducer, PcmConsumer) {
        (
            PcmProducer {
                producer: self.producer,
            },
            PcmConsumer {
                consumer: self.consumer,
            },
        )
    }
}

/// Producer half, owned by the writer side.
pub struct PcmProducer {
    producer: Producer<i16>,
}

impl PcmProducer {
    /// Non-blocking partial write; returns samples accepted.
    pub fn write(&mut self, samples: &[i16]) -> usize {
        let want = samples.len().min(self.producer.slots());
        if want == 0 {
            return 0;
        }
        let mut chunk = match self.producer.write_chunk(want) {
            Ok(chunk) => chunk,
            Err(_) => return 0,
        };
        // Write may wrap; fill both slices.
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&samples[..split]);
        if !second.is_empty() {
            second.copy_from_slice(&samples[split..split + second.len()]);
        }
        chunk.commit_all();
        want
    }

    /// Available space in samples.
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer half, owned by the device callback.
pub struct PcmConsumer {
    consumer: Consumer<i16>,
}

impl PcmConsumer {
    /// Non-blocking read; returns samples read.
    pub fn read(&mut self, buffer: &mut [i16]) -> usize {
        let chunk = match self.consumer.read_chunk(buffer.len()) {
            Ok(chunk) => chunk,
            Err(rtrb::chunks::ChunkError::TooFewSlots(available)) => {
                if available == 0 {
                    return 0;
                }
                match self.consumer.read_chunk(available) {
                    Ok(chunk) => chunk,
                    Err(_) => return 0,
                }
            }
        };
        let len = chunk.len();
        let (first, second) = chunk.as_slices();
        let split = first.len();
        buffer[..split].copy_from_slice(first);
        if !second.is_empty() {
            buffer[split..split + second.len()].copy_from_slice(second);
        }
        chunk.commit_all();
        len
    }

    pub fn slots(&self) -> usize {
        self.consumer.slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_write_read() {
        let rb = PcmRingBuffer::new(1024);
        let (mut producer, mut consumer) = rb.split();

        assert_eq!(producer.write(&[1, 2, 3, 4, 5]), 5);

        let mut buffer = [0i16; 10];
        let read = consumer.read(&mut buffer);
        assert_eq!(read, 5);
        assert_eq!(&buffer[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn partial_write_when_full() {
        let rb = PcmRingBuffer::new(16);
        let (mut producer, mut consumer) = rb.split();

        assert_eq!(producer.write(&[7i16; 20]), 16);
        assert_eq!(producer.write(&[7i16; 4]), 0);

        let mut buffer = [0i16; 8];
        assert_eq!(consumer.read(&mut buffer), 8);
        assert_eq!(producer.write(&[7i16; 20]), 8);
    }
}
